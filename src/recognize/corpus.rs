use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::quran::{CorpusAyah, QuranClient};

/// Source of surah text for transcript matching.
#[async_trait]
pub trait Corpus: Send + Sync {
    async fn surah_ayahs(&self, surah: u32, token: &CancellationToken) -> Result<Vec<CorpusAyah>>;
}

/// Corpus backed by one edition of the verse API.
pub struct EditionCorpus {
    client: QuranClient,
    edition: String,
}

impl EditionCorpus {
    pub fn new(client: QuranClient, edition: impl Into<String>) -> Self {
        Self {
            client,
            edition: edition.into(),
        }
    }
}

#[async_trait]
impl Corpus for EditionCorpus {
    async fn surah_ayahs(&self, surah: u32, token: &CancellationToken) -> Result<Vec<CorpusAyah>> {
        self.client
            .fetch_corpus_surah(surah, &self.edition, token)
            .await
    }
}
