//! The timing pipeline: fetch verses, acquire the recitation, align words,
//! build and repair the timeline, then write captions.

mod alignment;
mod identify;

pub use alignment::WordAlignment;
pub use identify::identify_recitation;

use anyhow::{Result, bail};
use clap::ValueEnum;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::align::{WhisperAligner, WhisperTool, WordAligner};
use crate::audio::{AudioSegment, Downloader, ffmpeg, silence};
use crate::captions::{self, DisplayMode};
use crate::common::{ensure_active, is_cancelled, paths, progress};
use crate::config::AppConfig;
use crate::quran::{QuranApiError, QuranClient, SURAH_COUNT, Verse};
use crate::timeline::{self, DEFAULT_MIN_SEGMENT, Timing};
use crate::ui::prelude::*;

/// One run of the pipeline.
#[derive(Debug, Clone)]
pub struct TimingsRequest {
    pub surah: u32,
    pub start_ayah: u32,
    pub end_ayah: u32,
    pub mode: DisplayMode,
    /// Existing recitation; when absent the clips are downloaded per ayah
    pub audio: Option<PathBuf>,
    /// Caption path; defaults to a name derived from the range in the output dir
    pub output: Option<PathBuf>,
    pub include_translation: bool,
}

impl TimingsRequest {
    fn default_file_name(&self) -> String {
        let mode = self
            .mode
            .to_possible_value()
            .map(|v| v.get_name().to_string())
            .unwrap_or_default();
        format!(
            "surah{}_{}-{}_{}.srt",
            self.surah, self.start_ayah, self.end_ayah, mode
        )
    }

    fn validate(&self) -> Result<()> {
        if !(1..=SURAH_COUNT).contains(&self.surah) {
            return Err(QuranApiError::InvalidSurah(self.surah).into());
        }
        if self.start_ayah == 0 || self.end_ayah < self.start_ayah {
            return Err(QuranApiError::InvalidRange {
                start: self.start_ayah,
                end: self.end_ayah,
            }
            .into());
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct TimingsOutcome {
    pub timings: Vec<Timing>,
    pub captions: Option<PathBuf>,
    pub timeline: Option<PathBuf>,
}

/// The recitation every timing refers to.
struct Recitation {
    path: PathBuf,
    segments: Vec<AudioSegment>,
    total: Duration,
    /// True when the user supplied one recording instead of per-ayah clips
    full_audio: bool,
}

pub struct Pipeline<'a> {
    config: &'a AppConfig,
    client: QuranClient,
    aligner: Box<dyn WordAligner>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a AppConfig) -> Result<Self> {
        let client = QuranClient::new(&config.quran_api.base_url, config.request_timeout())?
            .with_retry(config.retry_policy());
        let tool = WhisperTool::new(&config.audio.whisper_cmd, &config.audio.language);
        Ok(Self {
            config,
            client,
            aligner: Box::new(WhisperAligner::new(tool)),
        })
    }

    pub fn with_aligner(mut self, aligner: Box<dyn WordAligner>) -> Self {
        self.aligner = aligner;
        self
    }

    pub async fn run(
        &self,
        request: &TimingsRequest,
        token: &CancellationToken,
    ) -> Result<TimingsOutcome> {
        request.validate()?;

        emit(
            Level::Info,
            "pipeline.fetch",
            &format!(
                "Fetching verses: Surah {}, ayahs {}-{}",
                request.surah, request.start_ayah, request.end_ayah
            ),
            None,
        );
        let translation = if request.include_translation {
            self.config.translation()
        } else {
            None
        };
        let verses = self
            .client
            .fetch_verses(
                request.surah,
                request.start_ayah,
                request.end_ayah,
                &self.config.quran_api.edition,
                translation,
                token,
            )
            .await?;

        let temp_dir = self.config.temp_dir();
        paths::ensure_dir(&temp_dir)?;
        let recitation = self
            .acquire_audio(&verses, request.audio.as_deref(), &temp_dir, token)
            .await?;

        emit(Level::Info, "pipeline.timings", "Preparing timings", None);
        let timings = timeline::build_timings(&verses, &recitation.segments)?;
        let timings = self.refine(timings, &recitation, request.mode, token).await?;

        let outcome = self.export(request, timings);
        emit(
            Level::Success,
            "pipeline.done",
            &format!("✓ Timed {} captions", outcome.timings.len()),
            None,
        );
        Ok(outcome)
    }

    async fn acquire_audio(
        &self,
        verses: &[Verse],
        audio: Option<&Path>,
        temp_dir: &Path,
        token: &CancellationToken,
    ) -> Result<Recitation> {
        match audio {
            Some(path) => self.use_recitation(verses, path, temp_dir, token).await,
            None => self.download_recitation(verses, temp_dir, token).await,
        }
    }

    async fn use_recitation(
        &self,
        verses: &[Verse],
        path: &Path,
        temp_dir: &Path,
        token: &CancellationToken,
    ) -> Result<Recitation> {
        if !path.is_file() {
            bail!("audio file not found: {}", path.display());
        }
        emit(
            Level::Info,
            "pipeline.audio.input",
            &format!("Using recitation audio: {}", path.display()),
            None,
        );

        let mut audio_path = path.to_path_buf();
        if self.config.audio.trim_silence {
            let trimmed = temp_dir.join("recitation_trim.mp3");
            match ffmpeg::trim_silence(
                path,
                &trimmed,
                self.config.audio.bitrate_kbps,
                self.config.audio.silence_db,
                self.config.audio.silence_sec,
                token,
            )
            .await
            {
                Ok(()) => audio_path = trimmed,
                Err(err) if is_cancelled(&err) => return Err(err),
                Err(err) => emit(
                    Level::Warn,
                    "pipeline.audio.trim_failed",
                    &format!("Failed to trim silence: {err:#}"),
                    None,
                ),
            }
        }

        let total = ffmpeg::probe_duration(&audio_path, token).await?;
        Ok(Recitation {
            segments: timeline::segments_from_duration(verses, total),
            path: audio_path,
            total,
            full_audio: true,
        })
    }

    async fn download_recitation(
        &self,
        verses: &[Verse],
        temp_dir: &Path,
        token: &CancellationToken,
    ) -> Result<Recitation> {
        let ayahs: Vec<u32> = verses.iter().map(|v| v.number).collect();
        emit(
            Level::Info,
            "pipeline.audio.download",
            &format!("Downloading audio segments for {} ayahs", ayahs.len()),
            None,
        );
        let downloader = Downloader::new(self.config.download_options())?;
        let segments = downloader
            .download_segments(&ayahs, &temp_dir.join("audio"), token)
            .await?;

        let path = temp_dir.join("audio_concat.mp3");
        let pb = progress::create_spinner("Concatenating audio segments".to_string());
        match ffmpeg::concat(&segments, &path, temp_dir, token).await {
            Ok(()) => progress::finish_spinner_with_success(pb, "Concatenated audio segments"),
            Err(err) => {
                pb.finish_and_clear();
                return Err(err);
            }
        }

        let total = segments.iter().map(|s| s.duration).sum();
        Ok(Recitation {
            path,
            segments,
            total,
            full_audio: false,
        })
    }

    /// Word alignment and the display-mode specific repairs.
    async fn refine(
        &self,
        timings: Vec<Timing>,
        recitation: &Recitation,
        mode: DisplayMode,
        token: &CancellationToken,
    ) -> Result<Vec<Timing>> {
        let alignment = WordAlignment::new(&self.config.audio, self.aligner.as_ref());
        let mut timings = timings;
        let mut aligned = false;

        if !mode.is_sequential() || recitation.full_audio {
            (timings, aligned) = self.align(&alignment, timings, recitation, token).await?;
        }
        if !mode.is_sequential() {
            return Ok(timings);
        }

        if aligned && recitation.full_audio {
            let (snapped, changed) = timeline::apply_ayah_boundaries(timings);
            timings = snapped;
            if changed {
                emit(
                    Level::Info,
                    "pipeline.boundaries",
                    "Aligned ayah boundaries to recitation audio",
                    None,
                );
            }
        }

        if !self.config.audio.pause_sensitive {
            return Ok(timeline::ensure_continuous(timings, recitation.total));
        }

        if !aligned {
            (timings, _) = self.align(&alignment, timings, recitation, token).await?;
        }
        ensure_active(token)?;
        match silence::detect(
            &recitation.path,
            self.config.audio.pause_db,
            self.config.audio.pause_sec,
            token,
        )
        .await
        {
            Ok(silences) if !silences.is_empty() => {
                emit(
                    Level::Debug,
                    "pipeline.pauses",
                    &format!("Detected {} pauses", silences.len()),
                    None,
                );
                Ok(timeline::split_on_silence(timings, &silences, DEFAULT_MIN_SEGMENT))
            }
            Ok(_) => Ok(timeline::ensure_continuous(timings, recitation.total)),
            Err(err) if is_cancelled(&err) => Err(err),
            Err(err) => {
                emit(
                    Level::Warn,
                    "pipeline.pauses.failed",
                    &format!("Pause-sensitive display failed: {err:#}"),
                    None,
                );
                Ok(timeline::ensure_continuous(timings, recitation.total))
            }
        }
    }

    async fn align(
        &self,
        alignment: &WordAlignment<'_>,
        timings: Vec<Timing>,
        recitation: &Recitation,
        token: &CancellationToken,
    ) -> Result<(Vec<Timing>, bool)> {
        if recitation.full_audio {
            alignment
                .align_full_audio(timings, &recitation.path, token)
                .await
        } else {
            alignment
                .align_segments(timings, &recitation.segments, &recitation.path, token)
                .await
        }
    }

    fn caption_path(&self, request: &TimingsRequest) -> PathBuf {
        match &request.output {
            Some(path) => path.with_extension("srt"),
            None => self.config.output_dir().join(request.default_file_name()),
        }
    }

    fn export(&self, request: &TimingsRequest, timings: Vec<Timing>) -> TimingsOutcome {
        let srt_path = self.caption_path(request);
        let mut outcome = TimingsOutcome {
            timings,
            captions: None,
            timeline: None,
        };

        if self.config.output.captions {
            emit(
                Level::Info,
                "pipeline.captions",
                &format!("Writing captions: {}", srt_path.display()),
                None,
            );
            match captions::write_srt(
                &srt_path,
                &outcome.timings,
                request.mode,
                request.include_translation,
            ) {
                Ok(()) => outcome.captions = Some(srt_path.clone()),
                Err(err) => emit(
                    Level::Warn,
                    "pipeline.captions.failed",
                    &format!("Failed to write captions: {err:#}"),
                    None,
                ),
            }
        }

        if self.config.output.timeline_json {
            let json_path = srt_path.with_extension("json");
            match captions::write_timeline_json(&json_path, &outcome.timings) {
                Ok(()) => outcome.timeline = Some(json_path),
                Err(err) => emit(
                    Level::Warn,
                    "pipeline.timeline.failed",
                    &format!("Failed to write timeline: {err:#}"),
                    None,
                ),
            }
        }
        outcome
    }
}
