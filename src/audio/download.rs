use anyhow::{Context, Result, anyhow};
use futures_util::StreamExt;
use futures_util::stream::FuturesUnordered;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::{AudioSegment, ffmpeg};
use crate::common::{Cancelled, paths, progress};
use crate::retry::RetryPolicy;
use crate::ui::prelude::*;

pub const DEFAULT_MAX_CONCURRENT: usize = 3;

#[derive(Debug, Clone)]
pub struct DownloadOptions {
    pub cdn_base_url: String,
    pub reciter: String,
    pub bitrate_kbps: u32,
    pub timeout: Duration,
    pub max_concurrent: usize,
    /// Strip leading and trailing silence from each clip after download
    pub trim_silence: bool,
    pub silence_db: i32,
    pub silence_sec: f64,
    pub retry: RetryPolicy,
}

/// Fetches per-ayah recitation clips from the audio CDN.
#[derive(Debug, Clone)]
pub struct Downloader {
    http: reqwest::Client,
    options: Arc<DownloadOptions>,
}

impl Downloader {
    pub fn new(options: DownloadOptions) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(format!("quranvideo/{}", env!("CARGO_PKG_VERSION")))
            .timeout(options.timeout)
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            http,
            options: Arc::new(options),
        })
    }

    fn clip_url(&self, ayah: u32) -> String {
        format!(
            "{}/{}/{}/{}.mp3",
            self.options.cdn_base_url.trim_end_matches('/'),
            self.options.bitrate_kbps,
            self.options.reciter,
            ayah
        )
    }

    /// Download the clips for `ayahs` (global ayah numbers) into `dest`,
    /// at most `max_concurrent` at a time. Segments come back in input
    /// order. The first failure to complete cancels the remaining downloads
    /// and is returned.
    pub async fn download_segments(
        &self,
        ayahs: &[u32],
        dest: &Path,
        token: &CancellationToken,
    ) -> Result<Vec<AudioSegment>> {
        paths::ensure_dir(dest)?;
        let limit = match self.options.max_concurrent {
            0 => DEFAULT_MAX_CONCURRENT,
            n => n,
        };
        let semaphore = Arc::new(Semaphore::new(limit));
        let batch_token = token.child_token();
        let bar = progress::create_counter(ayahs.len() as u64, "Downloading ayahs".to_string());

        let mut pending = FuturesUnordered::new();
        for (idx, &ayah) in ayahs.iter().enumerate() {
            let downloader = self.clone();
            let semaphore = semaphore.clone();
            let token = batch_token.clone();
            let dest = dest.to_path_buf();
            let bar = bar.clone();
            let handle = tokio::spawn(async move {
                let segment = downloader
                    .fetch_segment_limited(ayah, &dest, &semaphore, &token)
                    .await;
                bar.inc(1);
                segment
            });
            pending.push(async move { (idx, handle.await) });
        }

        let mut slots: Vec<Option<AudioSegment>> = vec![None; ayahs.len()];
        let mut failure = None;
        while let Some((idx, joined)) = pending.next().await {
            match joined {
                Ok(Ok(segment)) => slots[idx] = Some(segment),
                Ok(Err(err)) => {
                    failure = Some(err);
                    break;
                }
                Err(join) => {
                    failure = Some(anyhow!("download task failed: {join}"));
                    break;
                }
            }
        }

        if let Some(err) = failure {
            batch_token.cancel();
            while pending.next().await.is_some() {}
            bar.finish_and_clear();
            return Err(err);
        }
        bar.finish_and_clear();

        let segments: Vec<AudioSegment> = slots.into_iter().flatten().collect();
        emit(
            Level::Debug,
            "audio.download.done",
            &format!("Downloaded {} ayah clips into {}", segments.len(), dest.display()),
            None,
        );
        Ok(segments)
    }

    async fn fetch_segment_limited(
        &self,
        ayah: u32,
        dest: &Path,
        semaphore: &Semaphore,
        token: &CancellationToken,
    ) -> Result<AudioSegment> {
        let _permit = tokio::select! {
            _ = token.cancelled() => return Err(Cancelled.into()),
            permit = semaphore.acquire() => permit.context("download limiter closed")?,
        };
        self.fetch_segment(ayah, dest, token).await
    }

    async fn fetch_segment(
        &self,
        ayah: u32,
        dest: &Path,
        token: &CancellationToken,
    ) -> Result<AudioSegment> {
        let url = self.clip_url(ayah);
        let mut path = dest.join(format!("{ayah}.mp3"));

        self.options
            .retry
            .run(token, &format!("download ayah {ayah}"), || {
                self.download_file(&url, &path)
            })
            .await
            .with_context(|| format!("download ayah {ayah}"))?;

        if self.options.trim_silence {
            let trimmed = dest.join(format!("{ayah}_trim.mp3"));
            match ffmpeg::trim_silence(
                &path,
                &trimmed,
                self.options.bitrate_kbps,
                self.options.silence_db,
                self.options.silence_sec,
                token,
            )
            .await
            {
                Ok(()) => path = trimmed,
                Err(err) if crate::common::is_cancelled(&err) => return Err(err),
                Err(err) => emit(
                    Level::Warn,
                    "audio.trim.failed",
                    &format!("Keeping untrimmed audio for ayah {ayah}: {err:#}"),
                    None,
                ),
            }
        }

        let duration = ffmpeg::probe_duration(&path, token)
            .await
            .with_context(|| format!("probe duration for ayah {ayah}"))?;

        Ok(AudioSegment {
            ayah_number: ayah,
            path: Some(path),
            duration,
        })
    }

    /// Stream `url` into `dest` through a `.part` file.
    async fn download_file(&self, url: &str, dest: &Path) -> Result<()> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to request {url}"))?;

        if !response.status().is_success() {
            return Err(anyhow!("Download failed with status: {}", response.status()));
        }

        let partial = part_path(dest);
        let mut file = tokio::fs::File::create(&partial)
            .await
            .with_context(|| format!("Failed to create {}", partial.display()))?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.context("Failed to read response")?;
            file.write_all(&chunk)
                .await
                .context("Failed to write file")?;
        }
        file.flush().await.context("Failed to write file")?;
        drop(file);

        tokio::fs::rename(&partial, dest)
            .await
            .with_context(|| format!("Failed to move download into {}", dest.display()))
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}
