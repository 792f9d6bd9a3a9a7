//! Word-level alignment of verse text against whisper transcriptions.

mod strategies;
mod whisper;

pub use strategies::align_words;
pub use whisper::{WhisperAligner, WhisperTool};

use async_trait::async_trait;
use serde::Serialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::common::Cancelled;

/// A single word with its timing information.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WordTiming {
    pub word: String,
    pub start: Duration,
    pub end: Duration,
}

/// Flattened word from the transcription tool's output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscribedWord {
    pub word: String,
    pub start: Duration,
    pub end: Duration,
}

#[derive(Error, Debug)]
pub enum AlignError {
    #[error("no words to align")]
    NoWords,

    #[error("whisper command not found: {0}")]
    ToolUnavailable(String),

    #[error("whisper failed: {0:#}")]
    Tool(anyhow::Error),

    #[error("no words found in whisper output")]
    EmptyTranscription,

    #[error("unable to align {words} words with {transcribed} whisper words")]
    Exhausted { words: usize, transcribed: usize },

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

impl From<anyhow::Error> for AlignError {
    fn from(err: anyhow::Error) -> Self {
        if crate::common::is_cancelled(&err) {
            AlignError::Cancelled(Cancelled)
        } else {
            AlignError::Tool(err)
        }
    }
}

/// Produces per-word timings for `words` spoken in `audio`.
#[async_trait]
pub trait WordAligner: Send + Sync {
    fn available(&self) -> bool;

    async fn align(
        &self,
        audio: &Path,
        words: &[String],
        token: &CancellationToken,
    ) -> Result<Vec<WordTiming>, AlignError>;
}
