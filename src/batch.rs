use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::captions::DisplayMode;
use crate::common::{is_cancelled, paths};
use crate::config::AppConfig;
use crate::pipeline::{Pipeline, TimingsRequest};
use crate::ui::prelude::*;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Job {
    pub surah: u32,
    pub start_ayah: u32,
    pub end_ayah: u32,
    #[serde(default)]
    pub mode: DisplayMode,
    /// File name inside the output directory
    #[serde(default)]
    pub output_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchFile {
    #[serde(default)]
    pub jobs: Vec<Job>,
}

impl BatchFile {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading batch file {}", path.display()))?;
        serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing batch file {}", path.display()))
    }
}

impl Job {
    fn request(&self, output_dir: &Path) -> TimingsRequest {
        TimingsRequest {
            surah: self.surah,
            start_ayah: self.start_ayah,
            end_ayah: self.end_ayah,
            mode: self.mode,
            audio: None,
            output: self.output_name.as_deref().map(|name| output_dir.join(name)),
            include_translation: true,
        }
    }
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Run every job in `path` in order. A failing job is reported and skipped;
/// cancellation stops the whole batch.
pub async fn run_batch(
    config: &AppConfig,
    path: &Path,
    token: &CancellationToken,
) -> Result<BatchSummary> {
    let batch = BatchFile::load(path)?;
    if batch.jobs.is_empty() {
        bail!("no jobs found in batch file {}", path.display());
    }

    let output_dir: PathBuf = config.output_dir();
    paths::ensure_dir(&output_dir)?;
    let pipeline = Pipeline::new(config)?;
    let total = batch.jobs.len();
    let mut summary = BatchSummary::default();

    for (idx, job) in batch.jobs.iter().enumerate() {
        emit(
            Level::Info,
            "batch.job.start",
            &format!("Starting batch job {}/{}", idx + 1, total),
            None,
        );
        match pipeline.run(&job.request(&output_dir), token).await {
            Ok(_) => summary.succeeded += 1,
            Err(err) if is_cancelled(&err) => return Err(err),
            Err(err) => {
                summary.failed += 1;
                emit(
                    Level::Warn,
                    "batch.job.failed",
                    &format!("Batch job {} failed: {err:#}", idx + 1),
                    None,
                );
            }
        }
    }

    emit(
        Level::Success,
        "batch.done",
        &format!(
            "✓ Batch finished: {} succeeded, {} failed",
            summary.succeeded, summary.failed
        ),
        None,
    );
    Ok(summary)
}
