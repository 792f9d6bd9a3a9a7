use anyhow::{Context, Result};
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::ffmpeg;

pub const DEFAULT_NOISE_DB: i32 = -35;
pub const DEFAULT_MIN_SILENCE_SEC: f64 = 0.2;

/// Interval quieter than the noise floor, `start < end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Silence {
    pub start: Duration,
    pub end: Duration,
}

/// Run ffmpeg `silencedetect` over the whole file.
pub async fn detect(
    audio: &Path,
    noise_db: i32,
    min_silence_sec: f64,
    token: &CancellationToken,
) -> Result<Vec<Silence>> {
    let noise_db = if noise_db == 0 { DEFAULT_NOISE_DB } else { noise_db };
    let min_silence_sec = if min_silence_sec <= 0.0 {
        DEFAULT_MIN_SILENCE_SEC
    } else {
        min_silence_sec
    };

    let args: Vec<OsString> = vec![
        "-i".into(),
        audio.as_os_str().to_owned(),
        "-af".into(),
        format!("silencedetect=noise={noise_db}dB:d={min_silence_sec:.2}").into(),
        "-f".into(),
        "null".into(),
        "-".into(),
    ];
    let log = ffmpeg::run(args, token)
        .await
        .with_context(|| format!("detecting silence in {}", audio.display()))?;
    Ok(parse_log(&log))
}

fn parse_seconds(raw: &str) -> Option<Duration> {
    let value = raw.trim().trim_end_matches('|').trim();
    let seconds: f64 = value.parse().ok()?;
    Duration::try_from_secs_f64(seconds.max(0.0)).ok()
}

/// Pair `silence_start:` / `silence_end:` lines. An end without a start
/// collapses to an empty interval and is dropped.
fn parse_log(log: &str) -> Vec<Silence> {
    const START: &str = "silence_start:";
    const END: &str = "silence_end:";

    let mut silences = Vec::new();
    let mut open: Option<Duration> = None;

    for line in log.lines() {
        if let Some(idx) = line.find(START) {
            if let Some(start) = parse_seconds(&line[idx + START.len()..]) {
                open = Some(start);
            }
            continue;
        }
        if let Some(idx) = line.find(END) {
            let end = line[idx + END.len()..]
                .split_whitespace()
                .next()
                .and_then(parse_seconds);
            if let Some(end) = end {
                let start = open.unwrap_or(end);
                if end > start {
                    silences.push(Silence { start, end });
                }
            }
            open = None;
        }
    }
    silences
}
