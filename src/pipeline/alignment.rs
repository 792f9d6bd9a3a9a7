use anyhow::Result;
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::align::{AlignError, WordAligner, WordTiming};
use crate::audio::{AudioSegment, onset};
use crate::common::Cancelled;
use crate::config::{AudioConfig, WordTimingMode};
use crate::timeline::{self, TimeOffset, Timing};
use crate::ui::prelude::*;

/// Word alignment step of the pipeline. Failures degrade to the even word
/// split that [`timeline::build_timings`] already produced.
pub struct WordAlignment<'a> {
    config: &'a AudioConfig,
    aligner: &'a dyn WordAligner,
}

impl<'a> WordAlignment<'a> {
    pub fn new(config: &'a AudioConfig, aligner: &'a dyn WordAligner) -> Self {
        Self { config, aligner }
    }

    /// Whether alignment should run at all. A missing tool is fatal only
    /// when whisper timing was demanded explicitly.
    pub fn enabled(&self) -> Result<bool, AlignError> {
        match self.config.word_timing {
            WordTimingMode::Even => Ok(false),
            _ if self.aligner.available() => Ok(true),
            WordTimingMode::Whisper => {
                Err(AlignError::ToolUnavailable(self.config.whisper_cmd.clone()))
            }
            WordTimingMode::Auto => {
                emit(
                    Level::Info,
                    "pipeline.align.unavailable",
                    &format!(
                        "{} not found; using even word timing",
                        self.config.whisper_cmd
                    ),
                    None,
                );
                Ok(false)
            }
        }
    }

    /// Align every verse against its own audio clip. Word times are moved
    /// onto the verse start. Returns whether any verse was aligned.
    pub async fn align_segments(
        &self,
        timings: Vec<Timing>,
        segments: &[AudioSegment],
        audio: &Path,
        token: &CancellationToken,
    ) -> Result<(Vec<Timing>, bool)> {
        if !self.enabled()? {
            return Ok((timings, false));
        }

        let mut timings = timings;
        let mut aligned_any = false;
        for (timing, segment) in timings.iter_mut().zip(segments) {
            let Some(path) = segment.path.as_deref() else {
                continue;
            };
            let words = verse_words(timing);
            if words.is_empty() {
                continue;
            }
            match self.aligner.align(path, &words, token).await {
                Ok(word_timings) => {
                    timing.word_timings = word_timings
                        .into_iter()
                        .map(|w| WordTiming {
                            word: w.word,
                            start: timing.start + w.start,
                            end: timing.start + w.end,
                        })
                        .collect();
                    aligned_any |= !timing.word_timings.is_empty();
                }
                Err(AlignError::Cancelled(_)) => return Err(Cancelled.into()),
                Err(err) => emit(
                    Level::Warn,
                    "pipeline.align.failed",
                    &format!(
                        "Word alignment failed for ayah {}: {err}; using even split",
                        timing.verse.number_in_surah
                    ),
                    None,
                ),
            }
        }

        let offset = self.word_offset(&timings, audio, token).await?;
        Ok((timeline::apply_word_offset(timings, offset), aligned_any))
    }

    /// Align all verse words against one recording and hand each verse back
    /// its own words.
    pub async fn align_full_audio(
        &self,
        timings: Vec<Timing>,
        audio: &Path,
        token: &CancellationToken,
    ) -> Result<(Vec<Timing>, bool)> {
        if !self.enabled()? {
            return Ok((timings, false));
        }

        let mut words = Vec::new();
        let mut verse_index = Vec::new();
        for (i, timing) in timings.iter().enumerate() {
            for word in verse_words(timing) {
                words.push(word);
                verse_index.push(i);
            }
        }
        if words.is_empty() {
            return Ok((timings, false));
        }

        let word_timings = match self.aligner.align(audio, &words, token).await {
            Ok(word_timings) => word_timings,
            Err(AlignError::Cancelled(_)) => return Err(Cancelled.into()),
            Err(err) => {
                emit(
                    Level::Warn,
                    "pipeline.align.failed",
                    &format!("Full-audio word alignment failed: {err}; using even split"),
                    None,
                );
                return Ok((timings, false));
            }
        };

        let mut per_verse: Vec<Vec<WordTiming>> = vec![Vec::new(); timings.len()];
        for (word, &verse) in word_timings.into_iter().zip(&verse_index) {
            per_verse[verse].push(word);
        }
        let mut timings = timings;
        for (timing, words) in timings.iter_mut().zip(per_verse) {
            if !words.is_empty() {
                timing.word_timings = words;
            }
        }

        let offset = self.word_offset(&timings, audio, token).await?;
        Ok((timeline::apply_word_offset(timings, offset), true))
    }

    /// Configured static offset plus, when enabled, the offset measured from
    /// energy onsets in `audio`.
    async fn word_offset(
        &self,
        timings: &[Timing],
        audio: &Path,
        token: &CancellationToken,
    ) -> Result<TimeOffset> {
        let offset = TimeOffset::from_millis(self.config.word_offset_ms);
        if !self.config.auto_word_offset {
            return Ok(offset);
        }
        let starts = timeline::collect_word_starts(timings);
        if starts.len() < 3 {
            return Ok(offset);
        }
        match onset::estimate_word_offset(audio, &starts, self.config.auto_word_offset_window_ms, token)
            .await
        {
            Ok(measured) => {
                emit(
                    Level::Info,
                    "pipeline.offset.auto",
                    &format!("Auto word offset: {measured}"),
                    None,
                );
                Ok(offset + measured)
            }
            Err(err) if crate::common::is_cancelled(&err) => Err(err),
            Err(err) => {
                emit(
                    Level::Warn,
                    "pipeline.offset.failed",
                    &format!("Auto word offset failed: {err:#}"),
                    None,
                );
                Ok(offset)
            }
        }
    }
}

fn verse_words(timing: &Timing) -> Vec<String> {
    timing
        .verse
        .text
        .split_whitespace()
        .map(str::to_string)
        .collect()
}
