//! Identify which surah and ayah range an unknown recitation covers.

mod corpus;
mod identify;
mod matcher;

pub use corpus::{Corpus, EditionCorpus};
pub use identify::WhisperRecognizer;
pub use matcher::{MatchError, MatchResult, Matcher};
