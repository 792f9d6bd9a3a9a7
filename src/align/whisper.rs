use anyhow::{Context, Result};
use async_trait::async_trait;
use duct::cmd;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{AlignError, TranscribedWord, WordAligner, WordTiming, align_words};
use crate::common::process::run_checked;
use crate::ui::prelude::*;

#[derive(Debug, Deserialize)]
struct WhisperOutput {
    #[serde(default)]
    text: String,
    #[serde(default)]
    segments: Vec<WhisperSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperSegment {
    #[serde(default)]
    words: Vec<WhisperWord>,
}

#[derive(Debug, Deserialize)]
struct WhisperWord {
    word: String,
    start: f64,
    end: f64,
}

fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or_default()
}

fn parse_words(json: &str) -> Result<Vec<TranscribedWord>> {
    let output: WhisperOutput =
        serde_json::from_str(json).context("Failed to parse whisper JSON output")?;
    Ok(output
        .segments
        .into_iter()
        .flat_map(|segment| segment.words)
        .map(|w| TranscribedWord {
            word: w.word.trim().to_string(),
            start: seconds(w.start),
            end: seconds(w.end),
        })
        .collect())
}

fn parse_text(json: &str) -> Result<String> {
    let output: WhisperOutput =
        serde_json::from_str(json).context("Failed to parse whisper JSON output")?;
    Ok(output.text.trim().to_string())
}

/// Options for one whisper run.
#[derive(Debug, Clone, Default)]
pub struct WhisperRequest<'a> {
    pub word_timestamps: bool,
    pub prompt: Option<&'a str>,
}

/// The `whisper` command line tool.
#[derive(Debug, Clone)]
pub struct WhisperTool {
    program: String,
    language: String,
}

impl WhisperTool {
    pub fn new(program: &str, language: &str) -> Self {
        let program = if program.trim().is_empty() {
            "whisper"
        } else {
            program.trim()
        };
        let language = if language.trim().is_empty() {
            "ar"
        } else {
            language.trim()
        };
        Self {
            program: program.to_string(),
            language: language.to_string(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn available(&self) -> bool {
        which::which(&self.program).is_ok()
    }

    fn baseline_args(&self, output_dir: &Path, request: &WhisperRequest) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--language".into(), self.language.clone().into()];
        if request.word_timestamps {
            args.extend(["--word_timestamps".into(), "True".into()]);
        }
        args.extend([
            "--output_format".into(),
            "json".into(),
            "--output_dir".into(),
            output_dir.as_os_str().to_owned(),
            "--task".into(),
            "transcribe".into(),
        ]);
        args
    }

    fn advanced_args(&self, output_dir: &Path, request: &WhisperRequest) -> Vec<OsString> {
        let mut args = self.baseline_args(output_dir, request);
        args.extend([
            "--temperature".into(),
            "0".into(),
            "--beam_size".into(),
            "5".into(),
            "--best_of".into(),
            "5".into(),
        ]);
        if let Some(prompt) = request.prompt.map(str::trim).filter(|p| !p.is_empty()) {
            args.extend(["--initial_prompt".into(), prompt.into()]);
        }
        args
    }

    /// Run whisper on `audio` and return the raw JSON it wrote. The
    /// high-accuracy run is tried first; the baseline run follows when it
    /// fails or leaves no parsable JSON. The scratch directory is removed on
    /// every path.
    pub async fn transcribe_json(
        &self,
        audio: &Path,
        request: &WhisperRequest<'_>,
        token: &CancellationToken,
    ) -> Result<String> {
        if !self.available() {
            anyhow::bail!(AlignError::ToolUnavailable(self.program.clone()));
        }

        let scratch = tempfile::Builder::new()
            .prefix("quranvideo-whisper-")
            .tempdir()
            .context("Failed to create whisper output directory")?;
        let json_path = output_json_path(scratch.path(), audio);

        let mut advanced = self.advanced_args(scratch.path(), request);
        advanced.push(audio.as_os_str().to_owned());
        let first = run_checked(
            cmd(self.program.as_str(), advanced)
                .stdout_capture()
                .stderr_capture(),
            token,
            "whisper",
        )
        .await
        .and_then(|_| read_output(&json_path));

        match first {
            Ok(json) => return Ok(json),
            Err(err) if crate::common::is_cancelled(&err) => return Err(err),
            Err(err) => emit(
                Level::Debug,
                "whisper.fallback",
                &format!("High accuracy whisper run failed, retrying baseline: {err:#}"),
                None,
            ),
        }

        let _ = std::fs::remove_file(&json_path);
        let mut baseline = self.baseline_args(scratch.path(), request);
        baseline.push(audio.as_os_str().to_owned());
        run_checked(
            cmd(self.program.as_str(), baseline)
                .stdout_capture()
                .stderr_capture(),
            token,
            "whisper",
        )
        .await?;
        read_output(&json_path)
    }

    /// Plain transcription text of `audio`.
    pub async fn transcribe_text(&self, audio: &Path, token: &CancellationToken) -> Result<String> {
        let json = self
            .transcribe_json(audio, &WhisperRequest::default(), token)
            .await?;
        let text = parse_text(&json)?;
        if text.is_empty() {
            anyhow::bail!("empty transcription");
        }
        Ok(text)
    }
}

/// Contents of the JSON whisper wrote, rejected unless it parses.
fn read_output(json_path: &Path) -> Result<String> {
    let json = std::fs::read_to_string(json_path)
        .with_context(|| format!("Failed to read whisper output {}", json_path.display()))?;
    serde_json::from_str::<WhisperOutput>(&json)
        .with_context(|| format!("Unusable whisper output {}", json_path.display()))?;
    Ok(json)
}

fn output_json_path(dir: &Path, audio: &Path) -> PathBuf {
    let stem = audio
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "audio".to_string());
    dir.join(format!("{stem}.json"))
}

/// Word aligner backed by whisper word timestamps.
#[derive(Debug, Clone)]
pub struct WhisperAligner {
    tool: WhisperTool,
}

impl WhisperAligner {
    pub fn new(tool: WhisperTool) -> Self {
        Self { tool }
    }
}

#[async_trait]
impl WordAligner for WhisperAligner {
    fn available(&self) -> bool {
        self.tool.available()
    }

    async fn align(
        &self,
        audio: &Path,
        words: &[String],
        token: &CancellationToken,
    ) -> Result<Vec<WordTiming>, AlignError> {
        if words.is_empty() {
            return Err(AlignError::NoWords);
        }
        if !self.tool.available() {
            return Err(AlignError::ToolUnavailable(self.tool.program.clone()));
        }

        let prompt = words.join(" ");
        let request = WhisperRequest {
            word_timestamps: true,
            prompt: Some(&prompt),
        };
        let json = self.tool.transcribe_json(audio, &request, token).await?;
        let transcribed = parse_words(&json)?;
        align_words(words, &transcribed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "text": " قل هو الله احد",
        "segments": [
            {"id": 0, "words": [
                {"word": " قل", "start": 0.0, "end": 0.42},
                {"word": " هو", "start": 0.42, "end": 0.8}
            ]},
            {"id": 1, "words": [
                {"word": " الله", "start": 0.9, "end": 1.5},
                {"word": " احد", "start": 1.5, "end": 2.25}
            ]},
            {"id": 2}
        ]
    }"#;

    #[test]
    fn flattens_segment_words() {
        let words = parse_words(SAMPLE).unwrap();
        assert_eq!(words.len(), 4);
        assert_eq!(words[0].word, "قل");
        assert_eq!(words[1].end, Duration::from_millis(800));
        assert_eq!(words[3].start, Duration::from_millis(1500));
    }

    #[test]
    fn reads_top_level_text() {
        assert_eq!(parse_text(SAMPLE).unwrap(), "قل هو الله احد");
    }

    #[test]
    fn advanced_args_extend_baseline() {
        let tool = WhisperTool::new("", "");
        let request = WhisperRequest {
            word_timestamps: true,
            prompt: Some("قل هو"),
        };
        let out = Path::new("/tmp/out");
        let base = tool.baseline_args(out, &request);
        let advanced = tool.advanced_args(out, &request);
        assert_eq!(tool.program(), "whisper");
        assert!(base.contains(&OsString::from("--word_timestamps")));
        assert!(base.contains(&OsString::from("ar")));
        assert_eq!(&advanced[..base.len()], &base[..]);
        assert!(advanced.contains(&OsString::from("--beam_size")));
        assert_eq!(advanced.last(), Some(&OsString::from("قل هو")));
    }

    #[test]
    fn json_named_after_audio_stem() {
        let path = output_json_path(Path::new("/tmp/x"), Path::new("/audio/full.mp3"));
        assert_eq!(path, PathBuf::from("/tmp/x/full.json"));
    }

    /// Shell stand-in for whisper. `advanced_run` runs in place of the
    /// normal output step when the high-accuracy flags are present; `$out`
    /// and `$stem` are set by then.
    #[cfg(unix)]
    fn fake_whisper(dir: &Path, advanced_run: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;
        let script = dir.join("fake-whisper");
        let body = format!(
            "#!/bin/sh\nout=''\nlast=''\nadvanced=''\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = '--output_dir' ]; then out=\"$2\"; fi\n  if [ \"$1\" = '--beam_size' ]; then advanced=1; fi\n  last=\"$1\"\n  shift\ndone\nstem=$(basename \"$last\")\nstem=${{stem%.*}}\nif [ -n \"$advanced\" ]; then\n  {advanced_run}\nfi\ncat > \"$out/$stem.json\" <<'JSON'\n{SAMPLE}\nJSON\n"
        );
        std::fs::write(&script, body).unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        script
    }

    #[cfg(unix)]
    fn ikhlas_words() -> Vec<String> {
        ["قُلْ", "هُوَ", "ٱللَّهُ", "أَحَدٌ"]
            .iter()
            .map(|w| w.to_string())
            .collect()
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn aligns_through_fake_tool_with_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_whisper(dir.path(), "exit 3");
        let aligner = WhisperAligner::new(WhisperTool::new(script.to_str().unwrap(), "ar"));
        let token = CancellationToken::new();
        let aligned = aligner
            .align(&dir.path().join("recitation.mp3"), &ikhlas_words(), &token)
            .await
            .unwrap();
        assert_eq!(aligned.len(), 4);
        assert_eq!(aligned[2].start, Duration::from_millis(900));
        assert_eq!(aligned[3].end, Duration::from_millis(2250));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn silent_high_accuracy_run_falls_back_to_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_whisper(dir.path(), "exit 0");
        let tool = WhisperTool::new(script.to_str().unwrap(), "ar");
        let token = CancellationToken::new();
        let json = tool
            .transcribe_json(
                &dir.path().join("recitation.mp3"),
                &WhisperRequest {
                    word_timestamps: true,
                    prompt: Some("قل هو"),
                },
                &token,
            )
            .await
            .unwrap();
        assert_eq!(parse_words(&json).unwrap().len(), 4);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unparsable_high_accuracy_output_falls_back_to_baseline() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_whisper(
            dir.path(),
            "printf 'not json' > \"$out/$stem.json\"; exit 0",
        );
        let aligner = WhisperAligner::new(WhisperTool::new(script.to_str().unwrap(), "ar"));
        let token = CancellationToken::new();
        let aligned = aligner
            .align(&dir.path().join("recitation.mp3"), &ikhlas_words(), &token)
            .await
            .unwrap();
        assert_eq!(aligned.len(), 4);
        assert_eq!(aligned[0].start, Duration::ZERO);
    }

    #[tokio::test]
    async fn missing_tool_is_reported() {
        let aligner = WhisperAligner::new(WhisperTool::new("definitely-not-a-whisper-binary", "ar"));
        let token = CancellationToken::new();
        let err = aligner
            .align(Path::new("a.mp3"), &["قل".to_string()], &token)
            .await
            .unwrap_err();
        assert!(matches!(err, AlignError::ToolUnavailable(_)));
    }
}
