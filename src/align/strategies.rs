use std::time::Duration;

use super::{AlignError, TranscribedWord, WordTiming};
use crate::text::{is_clitic, normalize_for_match, word_len};
use crate::ui::prelude::*;

const UNIT_MIN_RATIO: f64 = 0.25;
const UNIT_MIN_MATCHES: usize = 2;
const LCS_MIN_RATIO: f64 = 0.45;
const POSITIONAL_MIN_RATIO: f64 = 0.5;

type Strategy = fn(&[String], &[TranscribedWord]) -> Option<Vec<WordTiming>>;

/// Tried in order; the first strategy that accepts wins.
const STRATEGIES: &[(&str, Strategy)] = &[
    ("units", align_by_units),
    ("greedy", align_by_normalized_match),
    ("lcs", align_by_lcs),
    ("positional", align_by_position),
];

/// Assign a timing to every word in `words` using the transcription.
pub fn align_words(
    words: &[String],
    transcribed: &[TranscribedWord],
) -> Result<Vec<WordTiming>, AlignError> {
    if words.is_empty() {
        return Err(AlignError::NoWords);
    }
    if transcribed.is_empty() {
        return Err(AlignError::EmptyTranscription);
    }

    for (name, strategy) in STRATEGIES {
        if let Some(aligned) = strategy(words, transcribed) {
            emit(
                Level::Debug,
                "align.strategy",
                &format!(
                    "Aligned {} words against {} transcribed words using {name}",
                    words.len(),
                    transcribed.len()
                ),
                None,
            );
            return Ok(aligned);
        }
    }

    Err(AlignError::Exhausted {
        words: words.len(),
        transcribed: transcribed.len(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: Duration,
    end: Duration,
}

/// One word, or a clitic glued to the word after it.
#[derive(Debug, Clone, PartialEq, Eq)]
struct AlignUnit {
    key: String,
    members: Vec<usize>,
}

fn build_units(words: &[String]) -> Vec<AlignUnit> {
    let mut units = Vec::with_capacity(words.len());
    let mut i = 0;
    while i < words.len() {
        let key = normalize_for_match(&words[i]);
        if is_clitic(&key) && i + 1 < words.len() {
            units.push(AlignUnit {
                key: normalize_for_match(&format!("{}{}", words[i], words[i + 1])),
                members: vec![i, i + 1],
            });
            i += 2;
            continue;
        }
        units.push(AlignUnit {
            key,
            members: vec![i],
        });
        i += 1;
    }
    units
}

/// Index pairs of a longest common subsequence. Empty keys never match.
fn lcs_pairs(a: &[String], b: &[String]) -> Vec<(usize, usize)> {
    let (n, m) = (a.len(), b.len());
    let same = |i: usize, j: usize| !a[i].is_empty() && a[i] == b[j];

    let mut dp = vec![vec![0usize; m + 1]; n + 1];
    for i in 1..=n {
        for j in 1..=m {
            dp[i][j] = if same(i - 1, j - 1) {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }

    let mut pairs = Vec::with_capacity(dp[n][m]);
    let (mut i, mut j) = (n, m);
    while i > 0 && j > 0 {
        if same(i - 1, j - 1) {
            pairs.push((i - 1, j - 1));
            i -= 1;
            j -= 1;
        } else if dp[i - 1][j] >= dp[i][j - 1] {
            i -= 1;
        } else {
            j -= 1;
        }
    }
    pairs.reverse();
    pairs
}

/// Interpolate unmatched slots between their matched neighbours. Runs at
/// either end use the transcription's first start or last end as the
/// missing neighbour.
fn fill_gaps(slots: &[Option<Span>], first_start: Duration, last_end: Duration) -> Vec<Span> {
    let mut out: Vec<Span> = Vec::with_capacity(slots.len());
    let mut i = 0;
    while i < slots.len() {
        if let Some(span) = slots[i] {
            out.push(span);
            i += 1;
            continue;
        }

        let run_start = i;
        while i < slots.len() && slots[i].is_none() {
            i += 1;
        }
        let count = i - run_start;

        let from = out.last().map_or(first_start, |s| s.end);
        let to = slots.get(i).copied().flatten().map_or(last_end, |s| s.start);
        let to = to.max(from);
        let step = (to - from) / count as u32;

        for k in 0..count {
            let start = from + step * k as u32;
            let end = if k + 1 == count { to } else { start + step };
            out.push(Span { start, end });
        }
    }
    out
}

fn transcript_bounds(transcribed: &[TranscribedWord]) -> (Duration, Duration) {
    let first = transcribed.first().map_or(Duration::ZERO, |w| w.start);
    let last = transcribed.last().map_or(Duration::ZERO, |w| w.end);
    (first, last)
}

fn transcript_keys(transcribed: &[TranscribedWord]) -> Vec<String> {
    transcribed
        .iter()
        .map(|w| normalize_for_match(&w.word))
        .collect()
}

/// Split a unit's span across its members by letter count. The last member
/// absorbs the rounding remainder.
fn expand_units(units: &[AlignUnit], spans: &[Span], words: &[String]) -> Vec<WordTiming> {
    let mut result: Vec<WordTiming> = words
        .iter()
        .map(|w| WordTiming {
            word: w.clone(),
            start: Duration::ZERO,
            end: Duration::ZERO,
        })
        .collect();

    for (unit, span) in units.iter().zip(spans) {
        let end = span.end.max(span.start);
        let weights: Vec<u128> = unit
            .members
            .iter()
            .map(|&idx| word_len(&words[idx]).max(1) as u128)
            .collect();
        let total: u128 = weights.iter().sum();
        let duration = (end - span.start).as_nanos();

        let mut cursor = span.start;
        for (pos, (&idx, weight)) in unit.members.iter().zip(&weights).enumerate() {
            let member_end = if pos + 1 == unit.members.len() {
                end
            } else {
                cursor + Duration::from_nanos((duration * weight / total) as u64)
            };
            result[idx].start = cursor;
            result[idx].end = member_end.max(cursor);
            cursor = result[idx].end;
        }
    }
    result
}

fn align_by_units(words: &[String], transcribed: &[TranscribedWord]) -> Option<Vec<WordTiming>> {
    let units = build_units(words);
    let keys: Vec<String> = units.iter().map(|u| u.key.clone()).collect();
    let pairs = lcs_pairs(&keys, &transcript_keys(transcribed));
    if pairs.is_empty() {
        return None;
    }
    let ratio = pairs.len() as f64 / units.len() as f64;
    if ratio < UNIT_MIN_RATIO && pairs.len() < UNIT_MIN_MATCHES {
        return None;
    }

    let mut slots = vec![None; units.len()];
    for (u, t) in pairs {
        slots[u] = Some(Span {
            start: transcribed[t].start,
            end: transcribed[t].end,
        });
    }
    let (first, last) = transcript_bounds(transcribed);
    let spans = fill_gaps(&slots, first, last);
    Some(expand_units(&units, &spans, words))
}

/// Every word must be found, in order, by scanning forward.
fn align_by_normalized_match(
    words: &[String],
    transcribed: &[TranscribedWord],
) -> Option<Vec<WordTiming>> {
    let keys = transcript_keys(transcribed);
    let mut cursor = 0;
    let mut aligned = Vec::with_capacity(words.len());

    for word in words {
        let needle = normalize_for_match(word);
        if needle.is_empty() {
            return None;
        }
        let offset = keys[cursor..].iter().position(|k| *k == needle)?;
        let hit = &transcribed[cursor + offset];
        aligned.push(WordTiming {
            word: word.clone(),
            start: hit.start,
            end: hit.end,
        });
        cursor += offset + 1;
    }
    Some(aligned)
}

fn align_by_lcs(words: &[String], transcribed: &[TranscribedWord]) -> Option<Vec<WordTiming>> {
    let keys: Vec<String> = words.iter().map(|w| normalize_for_match(w)).collect();
    let pairs = lcs_pairs(&keys, &transcript_keys(transcribed));
    if pairs.is_empty() || (pairs.len() as f64 / words.len() as f64) < LCS_MIN_RATIO {
        return None;
    }

    let mut slots = vec![None; words.len()];
    for (w, t) in pairs {
        slots[w] = Some(Span {
            start: transcribed[t].start,
            end: transcribed[t].end,
        });
    }
    let (first, last) = transcript_bounds(transcribed);
    let spans = fill_gaps(&slots, first, last);
    Some(
        words
            .iter()
            .zip(spans)
            .map(|(word, span)| WordTiming {
                word: word.clone(),
                start: span.start,
                end: span.end,
            })
            .collect(),
    )
}

/// Same-length lists paired by position, if enough positions agree.
fn align_by_position(words: &[String], transcribed: &[TranscribedWord]) -> Option<Vec<WordTiming>> {
    if words.len() != transcribed.len() {
        return None;
    }
    let agree = words
        .iter()
        .zip(transcribed)
        .filter(|(w, t)| normalize_for_match(w) == normalize_for_match(&t.word))
        .count();
    if (agree as f64 / words.len() as f64) < POSITIONAL_MIN_RATIO {
        return None;
    }
    Some(
        words
            .iter()
            .zip(transcribed)
            .map(|(word, t)| WordTiming {
                word: word.clone(),
                start: t.start,
                end: t.end,
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|w| w.to_string()).collect()
    }

    fn heard(list: &[(&str, u64, u64)]) -> Vec<TranscribedWord> {
        list.iter()
            .map(|(w, s, e)| TranscribedWord {
                word: w.to_string(),
                start: ms(*s),
                end: ms(*e),
            })
            .collect()
    }

    #[test]
    fn clitics_merge_with_following_word() {
        let units = build_units(&words(&["و", "الله", "خير"]));
        assert_eq!(units.len(), 2);
        assert_eq!(units[0].key, "والله");
        assert_eq!(units[0].members, vec![0, 1]);
        assert_eq!(units[1].members, vec![2]);
    }

    #[test]
    fn trailing_clitic_stays_alone() {
        let units = build_units(&words(&["قل", "و"]));
        assert_eq!(units.len(), 2);
        assert_eq!(units[1].members, vec![1]);
    }

    #[test]
    fn exact_transcription_maps_one_to_one() {
        let target = words(&["قُلْ", "هُوَ", "ٱللَّهُ", "أَحَدٌ"]);
        let observed = heard(&[
            ("قل", 0, 300),
            ("هو", 300, 600),
            ("الله", 600, 1000),
            ("احد", 1000, 1500),
        ]);
        let aligned = align_words(&target, &observed).unwrap();
        let spans: Vec<_> = aligned.iter().map(|w| (w.start, w.end)).collect();
        assert_eq!(
            spans,
            vec![
                (ms(0), ms(300)),
                (ms(300), ms(600)),
                (ms(600), ms(1000)),
                (ms(1000), ms(1500))
            ]
        );
        assert_eq!(aligned[2].word, "ٱللَّهُ");
    }

    #[test]
    fn merged_clitic_unit_splits_by_letters() {
        // whisper hears the clitic and host as one token
        let target = words(&["و", "لم", "يكن"]);
        let observed = heard(&[("ولم", 0, 900), ("يكن", 900, 1500)]);
        let aligned = align_words(&target, &observed).unwrap();
        assert_eq!((aligned[0].start, aligned[0].end), (ms(0), ms(300)));
        assert_eq!((aligned[1].start, aligned[1].end), (ms(300), ms(900)));
        assert_eq!((aligned[2].start, aligned[2].end), (ms(900), ms(1500)));
    }

    #[test]
    fn missing_words_are_interpolated() {
        let target = words(&["a", "b", "c", "d"]);
        let observed = heard(&[("a", 0, 100), ("d", 400, 500)]);
        let aligned = align_words(&target, &observed).unwrap();
        assert_eq!((aligned[1].start, aligned[1].end), (ms(100), ms(250)));
        assert_eq!((aligned[2].start, aligned[2].end), (ms(250), ms(400)));
        assert_eq!((aligned[3].start, aligned[3].end), (ms(400), ms(500)));
    }

    #[test]
    fn leading_gap_uses_first_transcribed_start() {
        let slots = [None, None, Some(Span { start: ms(600), end: ms(700) })];
        let spans = fill_gaps(&slots, ms(200), ms(900));
        assert_eq!(spans[0], Span { start: ms(200), end: ms(400) });
        assert_eq!(spans[1], Span { start: ms(400), end: ms(600) });
    }

    #[test]
    fn collapsed_gap_yields_points() {
        let slots = [
            Some(Span { start: ms(0), end: ms(500) }),
            None,
            None,
            Some(Span { start: ms(400), end: ms(600) }),
        ];
        let spans = fill_gaps(&slots, ms(0), ms(600));
        assert_eq!(spans[1], Span { start: ms(500), end: ms(500) });
        assert_eq!(spans[2], Span { start: ms(500), end: ms(500) });
    }

    #[test]
    fn greedy_round_trip() {
        let target = words(&["x", "y", "z"]);
        let observed = heard(&[("x", 0, 10), ("noise", 10, 20), ("y", 20, 30), ("z", 30, 40)]);
        let aligned = align_by_normalized_match(&target, &observed).unwrap();
        let got: Vec<_> = aligned.iter().map(|w| w.start).collect();
        assert_eq!(got, vec![ms(0), ms(20), ms(30)]);
    }

    #[test]
    fn greedy_fails_when_a_word_is_missing() {
        let target = words(&["x", "q"]);
        let observed = heard(&[("x", 0, 10), ("y", 10, 20)]);
        assert!(align_by_normalized_match(&target, &observed).is_none());
    }

    #[test]
    fn positional_requires_equal_length_and_half_agreement() {
        let target = words(&["a", "b", "c", "d"]);
        let good = heard(&[("a", 0, 1), ("b", 1, 2), ("x", 2, 3), ("y", 3, 4)]);
        let aligned = align_by_position(&target, &good).unwrap();
        assert_eq!(aligned[3].start, ms(3));

        let poor = heard(&[("a", 0, 1), ("x", 1, 2), ("y", 2, 3), ("z", 3, 4)]);
        assert!(align_by_position(&target, &poor).is_none());
        assert!(align_by_position(&target, &good[..3]).is_none());
    }

    #[test]
    fn unrelated_transcription_exhausts_the_cascade() {
        let target = words(&["a", "b", "c", "d", "e"]);
        let observed = heard(&[("v", 0, 1), ("w", 1, 2)]);
        match align_words(&target, &observed) {
            Err(AlignError::Exhausted { words, transcribed }) => {
                assert_eq!((words, transcribed), (5, 2));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn empty_inputs_are_rejected() {
        assert!(matches!(align_words(&[], &heard(&[("a", 0, 1)])), Err(AlignError::NoWords)));
        assert!(matches!(
            align_words(&words(&["a"]), &[]),
            Err(AlignError::EmptyTranscription)
        ));
    }
}
