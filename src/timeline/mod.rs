//! Verse and word timelines: initial build, repair passes and silence
//! splitting. Every pass takes the timings by value and returns the
//! repaired list.

mod build;
mod offset;
mod repair;
mod split;

pub use build::{build_timings, segments_from_duration};
pub use offset::TimeOffset;
pub use repair::{
    apply_ayah_boundaries, apply_word_offset, collect_word_starts, ensure_continuous,
    has_word_timings,
};
pub use split::{DEFAULT_MIN_SEGMENT, allocate_counts, split_on_silence};

use std::time::Duration;
use thiserror::Error;

use crate::align::WordTiming;
use crate::quran::Verse;

/// One displayed unit: a verse (or fragment of one) over `[start, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timing {
    pub verse: Verse,
    pub start: Duration,
    pub end: Duration,
    pub word_timings: Vec<WordTiming>,
}

impl Timing {
    pub fn duration(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TimelineError {
    #[error("verses and audio segments count mismatch ({verses} verses, {segments} segments)")]
    CountMismatch { verses: usize, segments: usize },
}
