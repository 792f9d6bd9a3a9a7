//! Centralized path management for quranvideo

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// `~/.quranvideo`, holding the default config file
pub fn app_home_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Unable to determine user home directory")?;
    Ok(home.join(".quranvideo"))
}

/// Default location of the YAML config
pub fn default_config_path() -> Result<PathBuf> {
    Ok(app_home_dir()?.join("config.yaml"))
}

/// Expand `~` and environment references in a user supplied path
pub fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(_) => PathBuf::from(shellexpand::tilde(raw).as_ref()),
    }
}

pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("creating directory at {}", path.display()))
}

/// Resolve to an absolute path without requiring the file to exist
pub fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("resolving {}", path.display()))
}
