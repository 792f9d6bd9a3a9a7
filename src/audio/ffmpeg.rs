use anyhow::{Context, Result};
use duct::cmd;
use std::ffi::OsString;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::AudioSegment;
use crate::common::paths;
use crate::common::process::{run_cancellable, run_checked};

pub fn ffmpeg_available() -> bool {
    which::which("ffmpeg").is_ok()
}

pub fn ffprobe_available() -> bool {
    which::which("ffprobe").is_ok()
}

/// Run ffmpeg and return its combined log output. Fails on a non-zero exit.
pub async fn run(args: Vec<OsString>, token: &CancellationToken) -> Result<String> {
    if !ffmpeg_available() {
        anyhow::bail!("ffmpeg not found in PATH");
    }
    let output = run_cancellable(
        cmd("ffmpeg", args).stderr_to_stdout().stdout_capture(),
        token,
        "ffmpeg",
    )
    .await?;
    let log = String::from_utf8_lossy(&output.stdout).to_string();
    if !output.status.success() {
        anyhow::bail!(
            "ffmpeg failed with status {:?}: {}",
            output.status.code(),
            last_lines(&log, 10)
        );
    }
    Ok(log)
}

fn last_lines(log: &str, count: usize) -> String {
    let lines: Vec<&str> = log.trim().lines().collect();
    lines[lines.len().saturating_sub(count)..].join("\n")
}

pub async fn probe_duration(path: &Path, token: &CancellationToken) -> Result<Duration> {
    if !ffprobe_available() {
        anyhow::bail!("ffprobe not found in PATH");
    }
    let output = run_checked(
        cmd!(
            "ffprobe",
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
            path
        )
        .stdout_capture()
        .stderr_capture(),
        token,
        "ffprobe",
    )
    .await
    .with_context(|| format!("Failed to probe duration of {}", path.display()))?;

    parse_duration(&String::from_utf8_lossy(&output.stdout))
        .with_context(|| format!("Unexpected ffprobe output for {}", path.display()))
}

fn parse_duration(raw: &str) -> Result<Duration> {
    let value = raw.trim();
    if value.is_empty() {
        anyhow::bail!("ffprobe returned empty duration");
    }
    let seconds: f64 = value
        .parse()
        .context("Failed to parse ffprobe duration as f64")?;
    Duration::try_from_secs_f64(seconds).context("ffprobe duration out of range")
}

/// `silenceremove` filter that strips leading and trailing silence.
fn trim_filter(silence_db: i32, silence_sec: f64) -> String {
    format!(
        "silenceremove=start_periods=1:start_duration={silence_sec:.2}:start_threshold={silence_db}dB:stop_periods=1:stop_duration={silence_sec:.2}:stop_threshold={silence_db}dB"
    )
}

pub async fn trim_silence(
    input: &Path,
    output: &Path,
    bitrate_kbps: u32,
    silence_db: i32,
    silence_sec: f64,
    token: &CancellationToken,
) -> Result<()> {
    let silence_db = if silence_db == 0 { -35 } else { silence_db };
    let silence_sec = if silence_sec <= 0.0 { 0.3 } else { silence_sec };
    let args: Vec<OsString> = vec![
        "-y".into(),
        "-i".into(),
        input.as_os_str().to_owned(),
        "-af".into(),
        trim_filter(silence_db, silence_sec).into(),
        "-b:a".into(),
        format!("{bitrate_kbps}k").into(),
        output.as_os_str().to_owned(),
    ];
    run(args, token)
        .await
        .with_context(|| format!("trimming silence from {}", input.display()))?;
    Ok(())
}

fn escape_concat_path(path: &str) -> String {
    path.replace('\'', "'\\''")
}

fn concat_list(segments: &[AudioSegment]) -> Result<String> {
    let mut list = String::new();
    for segment in segments {
        let path = segment
            .path
            .as_deref()
            .with_context(|| format!("segment for ayah {} has no file", segment.ayah_number))?;
        let absolute = paths::absolute(path)?;
        list.push_str(&format!(
            "file '{}'\n",
            escape_concat_path(&absolute.to_string_lossy())
        ));
    }
    Ok(list)
}

/// Join segment files with the concat demuxer, without re-encoding.
pub async fn concat(
    segments: &[AudioSegment],
    output: &Path,
    temp_dir: &Path,
    token: &CancellationToken,
) -> Result<()> {
    if segments.is_empty() {
        anyhow::bail!("no audio segments to concatenate");
    }
    paths::ensure_dir(temp_dir)?;
    let list_path = paths::absolute(&temp_dir.join("audio_concat.txt"))?;
    std::fs::write(&list_path, concat_list(segments)?)
        .with_context(|| format!("writing concat list {}", list_path.display()))?;

    let args: Vec<OsString> = vec![
        "-y".into(),
        "-f".into(),
        "concat".into(),
        "-safe".into(),
        "0".into(),
        "-i".into(),
        list_path.into_os_string(),
        "-c".into(),
        "copy".into(),
        output.as_os_str().to_owned(),
    ];
    run(args, token)
        .await
        .with_context(|| format!("concatenating audio into {}", output.display()))?;
    Ok(())
}
