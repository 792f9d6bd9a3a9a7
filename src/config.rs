use anyhow::{Context, Result, bail};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::DownloadOptions;
use crate::common::paths;
use crate::retry::{DEFAULT_ATTEMPTS, RetryPolicy};

lazy_static! {
    static ref ENV_REF: Regex = Regex::new(r"\$\{([^}]+)\}").expect("valid env reference pattern");
}

/// Replace `${VAR}` references with the environment value, or nothing when unset.
pub fn expand_env(value: &str) -> String {
    ENV_REF
        .replace_all(value, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned()
}

/// How per-word timing is obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WordTimingMode {
    /// Align with whisper when it is installed, else split evenly
    #[default]
    Auto,
    /// Always align with whisper; a missing tool is an error
    Whisper,
    /// Never align
    Even,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuranApiConfig {
    pub base_url: String,
    pub edition: String,
    /// Translation edition; empty disables translations
    pub translation: String,
    pub reciter: String,
    pub timeout_sec: u64,
}

impl Default for QuranApiConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.alquran.cloud/v1".to_string(),
            edition: "quran-uthmani".to_string(),
            translation: "en.sahih".to_string(),
            reciter: "ar.alafasy".to_string(),
            timeout_sec: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub cdn_base_url: String,
    pub bitrate_kbps: u32,
    pub max_concurrent: usize,
    pub word_timing: WordTimingMode,
    /// Static shift applied to every word, negative shows words earlier
    pub word_offset_ms: i64,
    pub auto_word_offset: bool,
    pub auto_word_offset_window_ms: u64,
    /// Split ayahs at audible pauses in sequential mode
    pub pause_sensitive: bool,
    pub pause_db: i32,
    pub pause_sec: f64,
    pub whisper_cmd: String,
    pub language: String,
    pub trim_silence: bool,
    pub silence_db: i32,
    pub silence_sec: f64,
    pub retry_base_delay_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            cdn_base_url: "https://cdn.islamic.network/quran/audio".to_string(),
            bitrate_kbps: 128,
            max_concurrent: 3,
            word_timing: WordTimingMode::Auto,
            word_offset_ms: -20,
            auto_word_offset: false,
            auto_word_offset_window_ms: 80,
            pause_sensitive: false,
            pause_db: -35,
            pause_sec: 0.20,
            whisper_cmd: "whisper".to_string(),
            language: "ar".to_string(),
            trim_silence: false,
            silence_db: -35,
            silence_sec: 0.30,
            retry_base_delay_ms: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: String,
    pub temp_dir: String,
    pub captions: bool,
    pub timeline_json: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: "./output".to_string(),
            temp_dir: "./output/tmp".to_string(),
            captions: true,
            timeline_json: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub quran_api: QuranApiConfig,
    pub audio: AudioConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load the config at `path`, writing the defaults there first when the
    /// file does not exist. The flag reports whether it was created.
    pub fn load_or_create(path: &Path) -> Result<(Self, bool)> {
        if !path.exists() {
            let config = Self::default();
            config.save_to_path(path)?;
            return Ok((config, true));
        }
        if path.is_dir() {
            bail!("config path points to a directory: {}", path.display());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let mut config: Self = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        config.expand_env();
        config
            .validate()
            .with_context(|| format!("invalid config {}", path.display()))?;
        Ok((config, false))
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("creating config directory {}", parent.display())
                })?;
            }
        }
        let yaml = serde_yaml::to_string(self).context("serializing config")?;
        fs::write(path, yaml).with_context(|| format!("writing config to {}", path.display()))
    }

    pub fn expand_env(&mut self) {
        for value in [
            &mut self.quran_api.base_url,
            &mut self.quran_api.edition,
            &mut self.quran_api.translation,
            &mut self.quran_api.reciter,
            &mut self.audio.cdn_base_url,
            &mut self.audio.whisper_cmd,
            &mut self.output.dir,
            &mut self.output.temp_dir,
        ] {
            *value = expand_env(value);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.quran_api.base_url.trim().is_empty() {
            bail!("quran_api.base_url is required");
        }
        if self.quran_api.edition.trim().is_empty() {
            bail!("quran_api.edition is required");
        }
        if self.quran_api.reciter.trim().is_empty() {
            bail!("quran_api.reciter is required");
        }
        if self.audio.bitrate_kbps == 0 {
            bail!("audio.bitrate_kbps must be positive");
        }
        if self.output.dir.trim().is_empty() {
            bail!("output.dir is required");
        }
        if self.output.temp_dir.trim().is_empty() {
            bail!("output.temp_dir is required");
        }
        match self.logging.level.trim().to_ascii_lowercase().as_str() {
            "" | "debug" | "info" | "warn" | "warning" | "error" => Ok(()),
            other => bail!("unsupported logging.level: {other}"),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.quran_api.timeout_sec.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: DEFAULT_ATTEMPTS,
            base_delay: Duration::from_millis(self.audio.retry_base_delay_ms),
        }
    }

    /// Translation edition to request, if any.
    pub fn translation(&self) -> Option<&str> {
        Some(self.quran_api.translation.trim()).filter(|t| !t.is_empty())
    }

    pub fn output_dir(&self) -> PathBuf {
        paths::expand_path(&self.output.dir)
    }

    pub fn temp_dir(&self) -> PathBuf {
        paths::expand_path(&self.output.temp_dir)
    }

    pub fn download_options(&self) -> DownloadOptions {
        DownloadOptions {
            cdn_base_url: self.audio.cdn_base_url.clone(),
            reciter: self.quran_api.reciter.clone(),
            bitrate_kbps: self.audio.bitrate_kbps,
            timeout: self.request_timeout(),
            max_concurrent: self.audio.max_concurrent,
            trim_silence: self.audio.trim_silence,
            silence_db: self.audio.silence_db,
            silence_sec: self.audio.silence_sec,
            retry: self.retry_policy(),
        }
    }
}
