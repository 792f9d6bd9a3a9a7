//! Verse text and translations from an alquran.cloud compatible API.

mod client;

pub use client::{QuranApiError, QuranClient};

#[cfg(test)]
pub(crate) use client::tests as client_tests;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SurahMeta {
    pub number: u32,
    pub name: String,
    pub english_name: String,
    pub english_name_translation: String,
    pub revelation_type: String,
}

/// One ayah with its optional translation. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Verse {
    /// Global ayah number across the whole Quran, used by the audio CDN
    pub number: u32,
    pub number_in_surah: u32,
    pub text: String,
    #[serde(default)]
    pub translation: String,
    pub surah: SurahMeta,
}

/// Raw ayah as used for corpus matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusAyah {
    pub number_in_surah: u32,
    pub text: String,
}

pub const SURAH_COUNT: u32 = 114;
