use anyhow::{Context, Result};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use super::{MatchError, MatchResult, Matcher};
use crate::align::WhisperTool;
use crate::ui::prelude::*;

/// Transcribes unknown recitations and matches them against the corpus.
pub struct WhisperRecognizer {
    tool: WhisperTool,
}

impl WhisperRecognizer {
    pub fn new(tool: WhisperTool) -> Self {
        Self { tool }
    }

    pub fn available(&self) -> bool {
        self.tool.available()
    }

    pub async fn identify(
        &self,
        audio: &Path,
        matcher: &Matcher<'_>,
        token: &CancellationToken,
    ) -> Result<MatchResult> {
        emit(
            Level::Info,
            "recognize.transcribe.start",
            &format!("Transcribing {} to identify the recitation", audio.display()),
            None,
        );
        let transcript = self
            .tool
            .transcribe_text(audio, token)
            .await
            .with_context(|| format!("transcribing {}", audio.display()))?;
        emit(
            Level::Debug,
            "recognize.transcript",
            &format!("Transcript: {transcript}"),
            None,
        );

        match matcher.identify(&transcript, token).await {
            Ok(result) => Ok(result),
            Err(MatchError::Cancelled(cancelled)) => Err(cancelled.into()),
            Err(err) => {
                emit(
                    Level::Info,
                    "recognize.transcript.unmatched",
                    &format!("Transcript: {transcript}"),
                    None,
                );
                Err(anyhow::Error::new(err)
                    .context(format!("matching transcript of {}", audio.display())))
            }
        }
    }
}
