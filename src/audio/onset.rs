use anyhow::{Context, Result};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::common::Cancelled;
use crate::timeline::TimeOffset;

const SAMPLE_RATE: u32 = 16_000;
const FRAME_MS: u64 = 10;
const FRAME_SAMPLES: usize = (SAMPLE_RATE as usize) * (FRAME_MS as usize) / 1000;
const FRAME_BYTES: usize = FRAME_SAMPLES * 2;
const MAX_SAMPLED_STARTS: usize = 80;
const ONSET_FRACTION: f64 = 0.35;

pub const DEFAULT_WINDOW_MS: u64 = 80;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum OnsetError {
    #[error("no word starts provided")]
    NoWordStarts,

    #[error("no energy frames extracted")]
    NoFrames,

    #[error("no valid offsets found")]
    NoOffsets,
}

/// RMS of one 10 ms frame of mono s16le PCM.
fn frame_rms(frame: &[u8]) -> f64 {
    let sum: f64 = frame
        .chunks_exact(2)
        .map(|b| {
            let v = f64::from(i16::from_le_bytes([b[0], b[1]]));
            v * v
        })
        .sum();
    (sum / FRAME_SAMPLES as f64).sqrt()
}

/// Index of the onset frame near `center`, searching `window` frames either
/// side. `None` when the window is flat or never rises.
pub fn estimate_onset_idx(energies: &[f64], center: usize, window: usize) -> Option<usize> {
    if energies.is_empty() {
        return None;
    }
    let last = energies.len() - 1;
    let center = center.min(last);
    let start = center.saturating_sub(window);
    let end = (center + window).min(last);
    if end - start < 2 {
        return Some(center);
    }

    let span = &energies[start..=end];
    let min = span.iter().copied().fold(f64::INFINITY, f64::min);
    let max = span.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max <= min {
        return None;
    }

    let threshold = min + (max - min) * ONSET_FRACTION;
    if let Some(i) = (start + 1..=end).find(|&i| energies[i - 1] < threshold && energies[i] >= threshold) {
        return Some(i);
    }

    // Steepest rise as a fallback
    let mut best = None;
    let mut best_delta = 0.0;
    for i in start + 1..=end {
        let delta = energies[i] - energies[i - 1];
        if delta > best_delta {
            best_delta = delta;
            best = Some(i);
        }
    }
    best
}

/// At most `max` evenly strided values.
pub fn sample_starts(values: &[Duration], max: usize) -> Vec<Duration> {
    if max == 0 || values.len() <= max {
        return values.to_vec();
    }
    let step = (values.len() / max).max(1);
    values.iter().step_by(step).take(max).copied().collect()
}

/// Median offset between predicted word starts and detected energy onsets.
pub fn offset_from_energies(
    energies: &[f64],
    word_starts: &[Duration],
    window_ms: u64,
) -> Result<TimeOffset, OnsetError> {
    if word_starts.is_empty() {
        return Err(OnsetError::NoWordStarts);
    }
    if energies.is_empty() {
        return Err(OnsetError::NoFrames);
    }
    let window_ms = if window_ms == 0 { DEFAULT_WINDOW_MS } else { window_ms };
    let window_frames = ((window_ms / FRAME_MS) as usize).max(1);
    let frame = Duration::from_millis(FRAME_MS);
    let max_offset = TimeOffset::from_millis(window_ms as i64);

    let mut offsets: Vec<TimeOffset> = sample_starts(word_starts, MAX_SAMPLED_STARTS)
        .into_iter()
        .filter_map(|start| {
            let center = (start.as_nanos() / frame.as_nanos()) as usize;
            let idx = estimate_onset_idx(energies, center, window_frames)?;
            let onset = frame * idx as u32;
            let delta = TimeOffset::between(start, onset);
            (delta.abs() <= max_offset).then_some(delta)
        })
        .collect();

    if offsets.is_empty() {
        return Err(OnsetError::NoOffsets);
    }
    offsets.sort();
    Ok(offsets[offsets.len() / 2])
}

/// Decode `audio` to 16 kHz mono PCM through ffmpeg and compute frame energies.
pub async fn read_energies(audio: &Path, token: &CancellationToken) -> Result<Vec<f64>> {
    if !super::ffmpeg::ffmpeg_available() {
        anyhow::bail!("ffmpeg not found in PATH");
    }
    let mut child = Command::new("ffmpeg")
        .args(["-hide_banner", "-nostdin", "-i"])
        .arg(audio)
        .args(["-vn", "-ac", "1", "-ar"])
        .arg(SAMPLE_RATE.to_string())
        .args(["-f", "s16le", "-"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("Failed to start ffmpeg for {}", audio.display()))?;

    let stdout = child.stdout.take().context("ffmpeg stdout not captured")?;
    let stderr_task = child.stderr.take().map(|mut stderr| {
        tokio::spawn(async move {
            let mut log = String::new();
            let _ = stderr.read_to_string(&mut log).await;
            log
        })
    });

    let read_frames = async move {
        let mut reader = BufReader::new(stdout);
        let mut frame = vec![0u8; FRAME_BYTES];
        let mut energies = Vec::with_capacity(4096);
        loop {
            match reader.read_exact(&mut frame).await {
                Ok(_) => energies.push(frame_rms(&frame)),
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(err) => return Err(anyhow::Error::new(err).context("ffmpeg read failed")),
            }
        }
        Ok::<_, anyhow::Error>(energies)
    };

    let energies = tokio::select! {
        _ = token.cancelled() => return Err(Cancelled.into()),
        result = read_frames => result?,
    };

    let status = child.wait().await.context("waiting for ffmpeg")?;
    if !status.success() {
        let log = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        anyhow::bail!("ffmpeg failed with {status}: {}", log.trim());
    }
    Ok(energies)
}

/// Estimate the global word offset of `audio` from energy onsets near the
/// predicted `word_starts`.
pub async fn estimate_word_offset(
    audio: &Path,
    word_starts: &[Duration],
    window_ms: u64,
    token: &CancellationToken,
) -> Result<TimeOffset> {
    if word_starts.is_empty() {
        return Err(OnsetError::NoWordStarts.into());
    }
    let energies = read_energies(audio, token).await?;
    Ok(offset_from_energies(&energies, word_starts, window_ms)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    /// Quiet until `onset_frame`, loud afterwards.
    fn step_energies(len: usize, onset_frame: usize) -> Vec<f64> {
        (0..len)
            .map(|i| if i < onset_frame { 10.0 } else { 1000.0 })
            .collect()
    }

    #[test]
    fn rms_of_constant_frame() {
        let mut pcm = Vec::new();
        for _ in 0..FRAME_SAMPLES * 2 {
            pcm.extend_from_slice(&(-300i16).to_le_bytes());
        }
        pcm.push(0);
        let energies: Vec<f64> = pcm.chunks_exact(FRAME_BYTES).map(frame_rms).collect();
        assert_eq!(energies.len(), 2);
        assert!((energies[0] - 300.0).abs() < 1e-9);
    }

    #[test]
    fn onset_is_first_rising_crossing() {
        let energies = step_energies(100, 53);
        assert_eq!(estimate_onset_idx(&energies, 50, 8), Some(53));
    }

    #[test]
    fn flat_window_has_no_onset() {
        let energies = vec![5.0; 40];
        assert_eq!(estimate_onset_idx(&energies, 20, 8), None);
    }

    #[test]
    fn narrow_window_returns_center() {
        let energies = vec![1.0, 2.0];
        assert_eq!(estimate_onset_idx(&energies, 5, 0), Some(1));
    }

    #[test]
    fn falling_window_has_no_onset() {
        let energies: Vec<f64> = (0..30).map(|i| 100.0 - i as f64).collect();
        assert_eq!(estimate_onset_idx(&energies, 15, 5), None);
    }

    #[test]
    fn sampling_caps_the_number_of_starts() {
        let starts: Vec<Duration> = (0..200).map(ms).collect();
        let sampled = sample_starts(&starts, 80);
        assert_eq!(sampled.len(), 80);
        assert_eq!(sampled[1], ms(2));
        assert_eq!(sample_starts(&starts[..5], 80).len(), 5);
    }

    #[test]
    fn median_offset_tracks_late_onsets() {
        // onsets land 30 ms after every predicted start
        let mut energies = vec![10.0; 600];
        let starts = [ms(1000), ms(2500), ms(4000)];
        for start in starts {
            let onset = (start.as_millis() / 10) as usize + 3;
            for e in energies.iter_mut().skip(onset).take(20) {
                *e = 1000.0;
            }
        }
        let offset = offset_from_energies(&energies, &starts, 80).unwrap();
        assert_eq!(offset, TimeOffset::from_millis(30));
    }

    #[test]
    fn offsets_outside_window_are_discarded() {
        let energies = step_energies(200, 190);
        let err = offset_from_energies(&energies, &[ms(500)], 80).unwrap_err();
        assert_eq!(err, OnsetError::NoOffsets);
    }

    #[test]
    fn empty_inputs_are_errors() {
        assert_eq!(
            offset_from_energies(&[1.0], &[], 80).unwrap_err(),
            OnsetError::NoWordStarts
        );
        assert_eq!(
            offset_from_energies(&[], &[ms(10)], 80).unwrap_err(),
            OnsetError::NoFrames
        );
    }
}
