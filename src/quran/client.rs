use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{CorpusAyah, SURAH_COUNT, SurahMeta, Verse};
use crate::retry::RetryPolicy;

#[derive(thiserror::Error, Debug)]
pub enum QuranApiError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}: {body}")]
    Http {
        status: u16,
        url: String,
        body: String,
    },

    #[error("surah {0} is outside 1-114")]
    InvalidSurah(u32),

    #[error("invalid ayah range {start}-{end}")]
    InvalidRange { start: u32, end: u32 },

    #[error("no verses found for surah {surah} range {start}-{end}")]
    NoVerses { surah: u32, start: u32, end: u32 },
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    data: ApiSurah,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiSurah {
    number: u32,
    #[serde(default)]
    name: String,
    #[serde(default)]
    english_name: String,
    #[serde(default)]
    english_name_translation: String,
    #[serde(default)]
    revelation_type: String,
    ayahs: Vec<ApiAyah>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiAyah {
    number: u32,
    text: String,
    number_in_surah: u32,
}

impl ApiSurah {
    fn meta(&self) -> SurahMeta {
        SurahMeta {
            number: self.number,
            name: self.name.clone(),
            english_name: self.english_name.clone(),
            english_name_translation: self.english_name_translation.clone(),
            revelation_type: self.revelation_type.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct QuranClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl QuranClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(format!("quranvideo/{}", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .context("building HTTP client for the verse API")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn get_surah(&self, surah: u32, edition: &str) -> Result<ApiSurah> {
        let url = format!(
            "{}/surah/{}/{}",
            self.base_url,
            surah,
            urlencoding::encode(edition)
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(QuranApiError::Network)?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(QuranApiError::Http {
                status,
                url,
                body: body.trim().chars().take(200).collect(),
            }
            .into());
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .with_context(|| format!("decoding verse API response from {url}"))?;
        Ok(parsed.data)
    }

    async fn fetch_surah(
        &self,
        surah: u32,
        edition: &str,
        token: &CancellationToken,
    ) -> Result<ApiSurah> {
        if !(1..=SURAH_COUNT).contains(&surah) {
            return Err(QuranApiError::InvalidSurah(surah).into());
        }
        self.retry
            .run(token, &format!("fetch surah {surah} ({edition})"), || {
                self.get_surah(surah, edition)
            })
            .await
            .with_context(|| format!("fetching surah {surah} edition {edition}"))
    }

    /// Fetch ayahs `start..=end` of `surah`, optionally joined with a
    /// translation edition.
    pub async fn fetch_verses(
        &self,
        surah: u32,
        start: u32,
        end: u32,
        edition: &str,
        translation: Option<&str>,
        token: &CancellationToken,
    ) -> Result<Vec<Verse>> {
        if start == 0 || end < start {
            return Err(QuranApiError::InvalidRange { start, end }.into());
        }

        let arabic = self.fetch_surah(surah, edition, token).await?;

        let translations: HashMap<u32, String> = match translation.filter(|t| !t.is_empty()) {
            Some(edition) => self
                .fetch_surah(surah, edition, token)
                .await?
                .ayahs
                .into_iter()
                .map(|a| (a.number_in_surah, a.text))
                .collect(),
            None => HashMap::new(),
        };

        let meta = arabic.meta();
        let verses: Vec<Verse> = arabic
            .ayahs
            .into_iter()
            .filter(|a| (start..=end).contains(&a.number_in_surah))
            .map(|a| Verse {
                number: a.number,
                number_in_surah: a.number_in_surah,
                translation: translations
                    .get(&a.number_in_surah)
                    .cloned()
                    .unwrap_or_default(),
                text: a.text,
                surah: meta.clone(),
            })
            .collect();

        if verses.is_empty() {
            return Err(QuranApiError::NoVerses { surah, start, end }.into());
        }
        Ok(verses)
    }

    /// All ayahs of one surah in a single edition, for transcript matching.
    pub async fn fetch_corpus_surah(
        &self,
        surah: u32,
        edition: &str,
        token: &CancellationToken,
    ) -> Result<Vec<CorpusAyah>> {
        let data = self.fetch_surah(surah, edition, token).await?;
        Ok(data
            .ayahs
            .into_iter()
            .map(|a| CorpusAyah {
                number_in_surah: a.number_in_surah,
                text: a.text,
            })
            .collect())
    }
}
