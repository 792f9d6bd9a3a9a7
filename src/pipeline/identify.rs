use anyhow::{Result, bail};
use std::path::Path;
use tokio_util::sync::CancellationToken;

use crate::align::WhisperTool;
use crate::config::AppConfig;
use crate::quran::QuranClient;
use crate::recognize::{EditionCorpus, MatchResult, Matcher, WhisperRecognizer};
use crate::ui::prelude::*;

/// Work out which surah and ayah range `audio` recites.
pub async fn identify_recitation(
    config: &AppConfig,
    audio: &Path,
    expected_surah: Option<u32>,
    token: &CancellationToken,
) -> Result<MatchResult> {
    if !audio.is_file() {
        bail!("audio file not found: {}", audio.display());
    }
    let recognizer = WhisperRecognizer::new(WhisperTool::new(
        &config.audio.whisper_cmd,
        &config.audio.language,
    ));
    if !recognizer.available() {
        bail!("whisper not available ({})", config.audio.whisper_cmd);
    }

    let client = QuranClient::new(&config.quran_api.base_url, config.request_timeout())?
        .with_retry(config.retry_policy());
    let corpus = EditionCorpus::new(client, config.quran_api.edition.clone());
    let matcher = Matcher::new(&corpus).expect_surah(expected_surah);

    let result = recognizer.identify(audio, &matcher, token).await?;
    emit(
        Level::Info,
        "identify.detected",
        &format!(
            "Detected recitation: Surah {}, Ayahs {}-{}",
            result.surah, result.start_ayah, result.end_ayah
        ),
        Some(serde_json::json!({
            "surah": result.surah,
            "start_ayah": result.start_ayah,
            "end_ayah": result.end_ayah,
        })),
    );
    Ok(result)
}
