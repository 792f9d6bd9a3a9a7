//! Caption output: SRT cues per display mode and the JSON timeline.

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::common::paths;
use crate::timeline::Timing;

/// How text is shown against the recitation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisplayMode {
    /// One caption per ayah (or pause-separated fragment)
    #[default]
    Sequential,
    /// One caption per word
    #[value(alias = "word")]
    #[serde(alias = "word")]
    WordByWord,
    /// One caption per pair of words
    #[value(aliases = ["pair", "2x2"])]
    #[serde(alias = "pair", alias = "2x2")]
    TwoByTwo,
}

impl DisplayMode {
    pub fn is_sequential(self) -> bool {
        self == DisplayMode::Sequential
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrtCue {
    pub start: Duration,
    pub end: Duration,
    pub text: String,
}

/// Cues for `timings` in the requested mode. Word modes skip verses
/// without word timings.
pub fn cues(timings: &[Timing], mode: DisplayMode, include_translation: bool) -> Vec<SrtCue> {
    match mode {
        DisplayMode::Sequential => timings
            .iter()
            .map(|t| {
                let mut text = t.verse.text.clone();
                if include_translation && !t.verse.translation.is_empty() {
                    text.push('\n');
                    text.push_str(&t.verse.translation);
                }
                SrtCue {
                    start: t.start,
                    end: t.end,
                    text,
                }
            })
            .collect(),
        DisplayMode::WordByWord => timings
            .iter()
            .flat_map(|t| &t.word_timings)
            .map(|w| SrtCue {
                start: w.start,
                end: w.end,
                text: w.word.clone(),
            })
            .collect(),
        DisplayMode::TwoByTwo => timings
            .iter()
            .flat_map(|t| t.word_timings.chunks(2))
            .map(|pair| {
                let first = &pair[0];
                let mut cue = SrtCue {
                    start: first.start,
                    end: first.end,
                    text: first.word.clone(),
                };
                if let Some(second) = pair.get(1) {
                    if !second.word.is_empty() {
                        cue.text = format!("{} {}", cue.text, second.word);
                    }
                    cue.end = cue.end.max(second.end);
                }
                cue
            })
            .collect(),
    }
}

/// `HH:MM:SS,mmm`
pub fn format_timestamp(duration: Duration) -> String {
    let total_ms = duration.as_millis();
    let hours = total_ms / 3_600_000;
    let minutes = (total_ms / 60_000) % 60;
    let seconds = (total_ms / 1000) % 60;
    let millis = total_ms % 1000;
    format!("{hours:02}:{minutes:02}:{seconds:02},{millis:03}")
}

pub fn render_srt(cues: &[SrtCue]) -> String {
    let mut out = String::new();
    for (idx, cue) in cues.iter().enumerate() {
        out.push_str(&format!(
            "{}\n{} --> {}\n{}\n\n",
            idx + 1,
            format_timestamp(cue.start),
            format_timestamp(cue.end),
            cue.text
        ));
    }
    out
}

pub fn write_srt(
    path: &Path,
    timings: &[Timing],
    mode: DisplayMode,
    include_translation: bool,
) -> Result<()> {
    ensure_parent(path)?;
    let srt = render_srt(&cues(timings, mode, include_translation));
    fs::write(path, srt).with_context(|| format!("writing captions to {}", path.display()))
}

#[derive(Debug, Serialize)]
pub struct TimelineWord {
    pub word: String,
    pub start_ms: u64,
    pub end_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct TimelineEntry {
    pub surah: u32,
    pub ayah: u32,
    pub text: String,
    pub translation: String,
    pub start_ms: u64,
    pub end_ms: u64,
    pub words: Vec<TimelineWord>,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

pub fn timeline_entries(timings: &[Timing]) -> Vec<TimelineEntry> {
    timings
        .iter()
        .map(|t| TimelineEntry {
            surah: t.verse.surah.number,
            ayah: t.verse.number_in_surah,
            text: t.verse.text.clone(),
            translation: t.verse.translation.clone(),
            start_ms: millis(t.start),
            end_ms: millis(t.end),
            words: t
                .word_timings
                .iter()
                .map(|w| TimelineWord {
                    word: w.word.clone(),
                    start_ms: millis(w.start),
                    end_ms: millis(w.end),
                })
                .collect(),
        })
        .collect()
}

pub fn write_timeline_json(path: &Path, timings: &[Timing]) -> Result<()> {
    ensure_parent(path)?;
    let json = serde_json::to_string_pretty(&timeline_entries(timings))
        .context("serializing timeline")?;
    fs::write(path, json).with_context(|| format!("writing timeline to {}", path.display()))
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => paths::ensure_dir(parent),
        _ => Ok(()),
    }
}
