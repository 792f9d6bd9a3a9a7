use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::Corpus;
use crate::common::{Cancelled, is_cancelled};
use crate::quran::{CorpusAyah, SURAH_COUNT};
use crate::text;
use crate::ui::prelude::*;

const MATCH_SCORE: i32 = 2;
const MISMATCH_SCORE: i32 = -1;
const GAP_SCORE: i32 = -1;

#[derive(Error, Debug)]
pub enum MatchError {
    #[error("empty normalized text")]
    EmptyTranscript,

    #[error("no match found")]
    NoMatch,

    #[error("no reliable match found ({matches} matching words, {coverage:.2} coverage)")]
    NoReliableMatch { matches: usize, coverage: f64 },

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchResult {
    pub surah: u32,
    pub start_ayah: u32,
    pub end_ayah: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    start_ayah: u32,
    end_ayah: u32,
    matches: usize,
    length: usize,
    score: i32,
    coverage: f64,
}

impl Candidate {
    /// Cross-surah ordering: matches, coverage, score, length.
    fn beats(&self, other: &Candidate) -> bool {
        (self.matches, self.coverage, self.score, self.length)
            > (other.matches, other.coverage, other.score, other.length)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Cell {
    score: i32,
    start: usize,
    matches: usize,
    length: usize,
}

impl Cell {
    /// In-DP ordering: score, matches, length.
    fn beats(&self, other: &Cell) -> bool {
        (self.score, self.matches, self.length) > (other.score, other.matches, other.length)
    }

    fn extend(&self, delta: i32, matched: bool, j: usize) -> Option<Cell> {
        let score = self.score + delta;
        if score <= 0 {
            return None;
        }
        Some(Cell {
            score,
            start: if self.score == 0 { j - 1 } else { self.start },
            matches: self.matches + usize::from(matched),
            length: self.length + 1,
        })
    }
}

/// Best local alignment of `needles` inside `haystack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LocalMatch {
    pub start: usize,
    pub end: usize,
    pub matches: usize,
    pub length: usize,
    pub score: i32,
}

/// Smith-Waterman style search with scores floored at zero. Only two DP
/// rows are kept.
pub(crate) fn local_align<S: AsRef<str>>(needles: &[S], haystack: &[S]) -> Option<LocalMatch> {
    let m = haystack.len();
    if needles.is_empty() || m == 0 {
        return None;
    }

    let mut prev = vec![Cell::default(); m + 1];
    let mut curr = vec![Cell::default(); m + 1];
    let mut best = Cell::default();
    let mut best_end = None;

    for needle in needles {
        let needle = needle.as_ref();
        curr[0] = Cell::default();
        for j in 1..=m {
            let matched = !needle.is_empty() && needle == haystack[j - 1].as_ref();
            let diag_delta = if matched { MATCH_SCORE } else { MISMATCH_SCORE };

            let mut cell = Cell {
                start: j - 1,
                ..Cell::default()
            };
            let options = [
                prev[j - 1].extend(diag_delta, matched, j),
                prev[j].extend(GAP_SCORE, false, j),
                curr[j - 1].extend(GAP_SCORE, false, j),
            ];
            for candidate in options.into_iter().flatten() {
                if candidate.beats(&cell) {
                    cell = candidate;
                }
            }

            curr[j] = cell;
            if cell.beats(&best) {
                best = cell;
                best_end = Some(j - 1);
            }
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    let end = best_end?;
    if best.score == 0 {
        return None;
    }
    Some(LocalMatch {
        start: best.start.min(end),
        end: best.start.max(end),
        matches: best.matches,
        length: best.length,
        score: best.score,
    })
}

fn flatten_ayahs(ayahs: &[CorpusAyah]) -> (Vec<String>, Vec<u32>) {
    let mut tokens = Vec::with_capacity(ayahs.len() * 10);
    let mut owners = Vec::with_capacity(ayahs.len() * 10);
    for (idx, ayah) in ayahs.iter().enumerate() {
        for token in text::tokens(&ayah.text) {
            tokens.push(token);
            owners.push(idx as u32 + 1);
        }
    }
    (tokens, owners)
}

fn match_surah(needles: &[String], ayahs: &[CorpusAyah]) -> Option<Candidate> {
    let (tokens, owners) = flatten_ayahs(ayahs);
    if tokens.is_empty() {
        return None;
    }
    let found = local_align(needles, &tokens)?;
    if found.matches == 0 || found.end >= owners.len() {
        return None;
    }
    Some(Candidate {
        start_ayah: owners[found.start],
        end_ayah: owners[found.end],
        matches: found.matches,
        length: found.length,
        score: found.score,
        coverage: found.matches as f64 / needles.len() as f64,
    })
}

pub(crate) fn min_required_matches(tokens: usize) -> usize {
    match tokens {
        0 => 0,
        n if n < 6 => n,
        n if n < 12 => 3,
        n if n < 20 => 4,
        n => n / 4,
    }
}

pub(crate) fn min_coverage(tokens: usize) -> f64 {
    match tokens {
        n if n < 10 => 0.5,
        n if n < 30 => 0.4,
        _ => 0.35,
    }
}

pub struct Matcher<'a> {
    corpus: &'a dyn Corpus,
    expected_surah: Option<u32>,
}

impl<'a> Matcher<'a> {
    pub fn new(corpus: &'a dyn Corpus) -> Self {
        Self {
            corpus,
            expected_surah: None,
        }
    }

    /// Restrict the search to one surah. Values outside 1-114 are ignored.
    pub fn expect_surah(mut self, surah: Option<u32>) -> Self {
        self.expected_surah = surah.filter(|s| (1..=SURAH_COUNT).contains(s));
        self
    }

    pub async fn identify(
        &self,
        transcript: &str,
        token: &CancellationToken,
    ) -> Result<MatchResult, MatchError> {
        let needles = text::tokens(transcript);
        if needles.is_empty() {
            return Err(MatchError::EmptyTranscript);
        }

        let surahs = match self.expected_surah {
            Some(s) => s..=s,
            None => 1..=SURAH_COUNT,
        };

        let mut best: Option<(u32, Candidate)> = None;
        for surah in surahs {
            let ayahs = match self.corpus.surah_ayahs(surah, token).await {
                Ok(ayahs) => ayahs,
                Err(err) if is_cancelled(&err) => return Err(Cancelled.into()),
                Err(err) => {
                    emit(
                        Level::Debug,
                        "recognize.corpus.skip",
                        &format!("Skipping surah {surah}: {err:#}"),
                        None,
                    );
                    continue;
                }
            };
            let Some(candidate) = match_surah(&needles, &ayahs) else {
                continue;
            };
            if best.as_ref().is_none_or(|(_, b)| candidate.beats(b)) {
                best = Some((surah, candidate));
            }
        }

        let Some((surah, best)) = best else {
            return Err(MatchError::NoMatch);
        };
        if best.matches < min_required_matches(needles.len())
            || best.coverage < min_coverage(needles.len())
        {
            return Err(MatchError::NoReliableMatch {
                matches: best.matches,
                coverage: best.coverage,
            });
        }
        if best.score == 0 {
            return Err(MatchError::NoMatch);
        }

        Ok(MatchResult {
            surah,
            start_ayah: best.start_ayah,
            end_ayah: best.end_ayah,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct MemoryCorpus {
        surahs: HashMap<u32, Vec<&'static str>>,
    }

    #[async_trait]
    impl Corpus for MemoryCorpus {
        async fn surah_ayahs(
            &self,
            surah: u32,
            _token: &CancellationToken,
        ) -> anyhow::Result<Vec<CorpusAyah>> {
            let ayahs = self
                .surahs
                .get(&surah)
                .ok_or_else(|| anyhow::anyhow!("surah {surah} unavailable"))?;
            Ok(ayahs
                .iter()
                .enumerate()
                .map(|(i, text)| CorpusAyah {
                    number_in_surah: i as u32 + 1,
                    text: text.to_string(),
                })
                .collect())
        }
    }

    fn corpus() -> MemoryCorpus {
        let mut surahs = HashMap::new();
        surahs.insert(
            1,
            vec![
                "بِسْمِ ٱللَّهِ ٱلرَّحْمَٰنِ ٱلرَّحِيمِ",
                "ٱلْحَمْدُ لِلَّهِ رَبِّ ٱلْعَٰلَمِينَ",
                "ٱلرَّحْمَٰنِ ٱلرَّحِيمِ",
                "مَٰلِكِ يَوْمِ ٱلدِّينِ",
                "إِيَّاكَ نَعْبُدُ وَإِيَّاكَ نَسْتَعِينُ",
                "ٱهْدِنَا ٱلصِّرَٰطَ ٱلْمُسْتَقِيمَ",
                "صِرَٰطَ ٱلَّذِينَ أَنْعَمْتَ عَلَيْهِمْ غَيْرِ ٱلْمَغْضُوبِ عَلَيْهِمْ وَلَا ٱلضَّآلِّينَ",
            ],
        );
        surahs.insert(
            112,
            vec![
                "قُلْ هُوَ ٱللَّهُ أَحَدٌ",
                "ٱللَّهُ ٱلصَّمَدُ",
                "لَمْ يَلِدْ وَلَمْ يُولَدْ",
                "وَلَمْ يَكُن لَّهُۥ كُفُوًا أَحَدٌ",
            ],
        );
        MemoryCorpus { surahs }
    }

    #[test]
    fn local_align_finds_exact_window() {
        let hay = ["a", "b", "c", "d", "e", "f"];
        let needles = ["c", "d", "e"];
        let found = local_align(&needles, &hay).unwrap();
        assert_eq!((found.start, found.end), (2, 4));
        assert_eq!(found.matches, 3);
        assert_eq!(found.score, 6);
    }

    #[test]
    fn local_align_tolerates_a_missing_word() {
        let hay = ["a", "b", "c", "d", "e", "f"];
        let needles = ["b", "c", "e", "f"];
        let found = local_align(&needles, &hay).unwrap();
        assert_eq!((found.start, found.end), (1, 5));
        assert_eq!(found.matches, 4);
        assert_eq!(found.score, 7);
    }

    #[test]
    fn local_align_without_overlap_is_none() {
        assert!(local_align(&["x", "y"], &["a", "b"]).is_none());
        let empty: [&str; 0] = [];
        assert!(local_align(&empty, &["a"]).is_none());
    }

    #[test]
    fn thresholds_follow_transcript_length() {
        assert_eq!(min_required_matches(4), 4);
        assert_eq!(min_required_matches(8), 3);
        assert_eq!(min_required_matches(15), 4);
        assert_eq!(min_required_matches(40), 10);
        assert_eq!(min_coverage(9), 0.5);
        assert_eq!(min_coverage(20), 0.4);
        assert_eq!(min_coverage(30), 0.35);
    }

    #[tokio::test]
    async fn identifies_middle_ayahs() {
        let corpus = corpus();
        let token = CancellationToken::new();
        let transcript = "الرحمن الرحيم مالك يوم الدين اياك نعبد واياك نستعين";
        let result = Matcher::new(&corpus)
            .identify(transcript, &token)
            .await
            .unwrap();
        assert_eq!(
            result,
            MatchResult {
                surah: 1,
                start_ayah: 3,
                end_ayah: 5
            }
        );
    }

    #[tokio::test]
    async fn expected_surah_limits_search() {
        let corpus = corpus();
        let token = CancellationToken::new();
        let result = Matcher::new(&corpus)
            .expect_surah(Some(112))
            .identify("قل هو الله احد الله الصمد", &token)
            .await
            .unwrap();
        assert_eq!((result.surah, result.start_ayah, result.end_ayah), (112, 1, 2));

        let err = Matcher::new(&corpus)
            .expect_surah(Some(112))
            .identify("مالك يوم الدين", &token)
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::NoMatch | MatchError::NoReliableMatch { .. }));
    }

    #[tokio::test]
    async fn unrelated_text_is_not_reliable() {
        let corpus = corpus();
        let token = CancellationToken::new();
        let err = Matcher::new(&corpus)
            .identify("hello world this is not a recitation at all", &token)
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::NoMatch | MatchError::NoReliableMatch { .. }));
    }

    #[tokio::test]
    async fn empty_transcript_is_rejected() {
        let corpus = corpus();
        let token = CancellationToken::new();
        let err = Matcher::new(&corpus).identify(" ، ", &token).await.unwrap_err();
        assert!(matches!(err, MatchError::EmptyTranscript));
    }
}
