//! Pause-sensitive display: verses that contain an audible pause are cut
//! into fragments at the pause, and their text is shared out between the
//! fragments.

use std::time::Duration;

use super::Timing;
use crate::align::WordTiming;
use crate::audio::Silence;
use crate::text::is_tiny_segment;

pub const DEFAULT_MIN_SEGMENT: Duration = Duration::from_millis(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: Duration,
    end: Duration,
}

impl Span {
    fn len(&self) -> Duration {
        self.end.saturating_sub(self.start)
    }
}

/// A contiguous run of spans paired with how many words each one shows.
struct Fragments {
    spans: Vec<Span>,
    counts: Vec<usize>,
}

impl Fragments {
    /// Fold fragment `idx` into its successor, or its predecessor when last.
    fn merge_away(&mut self, idx: usize) {
        let span = self.spans.remove(idx);
        let count = self.counts.remove(idx);
        if idx < self.spans.len() {
            self.spans[idx].start = span.start;
            self.counts[idx] += count;
        } else {
            let prev = idx - 1;
            self.spans[prev].end = span.end;
            self.counts[prev] += count;
        }
    }

    fn merge_tiny<S: AsRef<str>>(&mut self, words: &[S]) {
        while self.spans.len() > 1 {
            let Some(idx) = tiny_index(words, &self.counts) else {
                break;
            };
            self.merge_away(idx);
        }
    }

    fn merge_short(&mut self, min_segment: Duration) {
        while self.spans.len() > 1 {
            let Some(idx) = self.spans.iter().position(|s| s.len() < min_segment) else {
                break;
            };
            self.merge_away(idx);
        }
    }
}

/// Split every timing that contains a silence. Word timings decide the cut
/// points when present; otherwise the silences are cut out of the verse
/// interval and the text is apportioned by fragment duration.
pub fn split_on_silence(
    timings: Vec<Timing>,
    silences: &[Silence],
    min_segment: Duration,
) -> Vec<Timing> {
    if timings.is_empty() || silences.is_empty() {
        return timings;
    }
    let min_segment = if min_segment.is_zero() {
        DEFAULT_MIN_SEGMENT
    } else {
        min_segment
    };

    let mut result = Vec::with_capacity(timings.len());
    for timing in timings {
        let local = relevant_silences(&timing, silences);
        if local.is_empty() {
            result.push(timing);
            continue;
        }
        let parts = split_by_word_timings(&timing, &local, min_segment)
            .or_else(|| split_by_time(&timing, &local, min_segment));
        match parts {
            Some(parts) => result.extend(parts),
            None => result.push(timing),
        }
    }
    result
}

fn relevant_silences(timing: &Timing, silences: &[Silence]) -> Vec<Silence> {
    let mut local: Vec<Silence> = silences
        .iter()
        .filter(|s| s.end > timing.start && s.start < timing.end)
        .copied()
        .collect();
    local.sort_by_key(|s| s.start);
    local
}

fn split_by_word_timings(
    timing: &Timing,
    silences: &[Silence],
    min_segment: Duration,
) -> Option<Vec<Timing>> {
    let words: Vec<&str> = timing.verse.text.split_whitespace().collect();
    let n = words.len().min(timing.word_timings.len());
    if n == 0 {
        return None;
    }
    let word_timings = &timing.word_timings[..n];
    let boundaries = boundaries_from_silence(&words[..n], word_timings, timing, silences);
    if boundaries.is_empty() {
        return None;
    }

    let counts = counts_from_boundaries(n, &boundaries);
    let mut fragments = Fragments {
        spans: spans_from_word_counts(word_timings, &counts),
        counts,
    };
    fragments.merge_tiny(&words[..n]);
    fragments.merge_short(min_segment);
    if fragments.spans.len() < 2 {
        return Some(vec![timing.clone()]);
    }

    let mut carried = Vec::with_capacity(fragments.counts.len());
    let mut cursor = 0;
    for &count in &fragments.counts {
        carried.push(word_timings[cursor..cursor + count].to_vec());
        cursor += count;
    }
    Some(assemble(timing, &words, &fragments, carried))
}

/// Word indices at which a new fragment begins: the word after the last one
/// that finishes before an interior silence starts. Cuts that would leave a
/// tiny fragment on either side are skipped.
fn boundaries_from_silence(
    words: &[&str],
    word_timings: &[WordTiming],
    timing: &Timing,
    silences: &[Silence],
) -> Vec<usize> {
    let mut boundaries = Vec::new();
    let mut last = 0;
    for silence in silences {
        if silence.start <= timing.start || silence.start >= timing.end {
            continue;
        }
        let idx = last_word_before(word_timings, silence.start);
        if idx <= last || idx >= words.len() {
            continue;
        }
        if is_tiny_segment(&words[last..idx]) || is_tiny_segment(&words[idx..]) {
            continue;
        }
        boundaries.push(idx);
        last = idx;
    }
    boundaries
}

fn last_word_before(word_timings: &[WordTiming], moment: Duration) -> usize {
    word_timings
        .iter()
        .rposition(|w| w.end <= moment)
        .map_or(0, |i| i + 1)
}

fn counts_from_boundaries(total: usize, boundaries: &[usize]) -> Vec<usize> {
    let mut counts = Vec::with_capacity(boundaries.len() + 1);
    let mut prev = 0;
    for &boundary in boundaries {
        counts.push(boundary - prev);
        prev = boundary;
    }
    counts.push(total - prev);
    counts
}

fn spans_from_word_counts(word_timings: &[WordTiming], counts: &[usize]) -> Vec<Span> {
    let mut spans = Vec::with_capacity(counts.len());
    let mut cursor = 0;
    for &count in counts {
        let group = &word_timings[cursor..cursor + count];
        cursor += count;
        if let (Some(first), Some(last)) = (group.first(), group.last()) {
            spans.push(Span {
                start: first.start,
                end: last.end.max(first.start),
            });
        }
    }
    spans
}

fn split_by_time(timing: &Timing, silences: &[Silence], min_segment: Duration) -> Option<Vec<Timing>> {
    let mut spans = spans_from_silence(timing, silences);
    merge_short_spans(&mut spans, min_segment);
    if spans.len() < 2 {
        return None;
    }

    let words: Vec<&str> = timing.verse.text.split_whitespace().collect();
    let translation_words = timing.verse.translation.split_whitespace().count();
    let mut limit = spans.len();
    if !words.is_empty() {
        limit = limit.min(words.len());
    }
    if translation_words > 0 {
        limit = limit.min(translation_words);
    }
    merge_to_count(&mut spans, limit.max(1));

    let durations: Vec<Duration> = spans.iter().map(Span::len).collect();
    let counts = allocate_counts(words.len(), &durations);
    let mut fragments = Fragments { spans, counts };
    fragments.merge_tiny(&words);
    if fragments.spans.len() < 2 {
        return None;
    }

    let carried = vec![Vec::new(); fragments.spans.len()];
    Some(assemble(timing, &words, &fragments, carried))
}

/// The verse interval with every silence cut out of it.
fn spans_from_silence(timing: &Timing, silences: &[Silence]) -> Vec<Span> {
    let mut spans = vec![Span {
        start: timing.start,
        end: timing.end,
    }];
    for silence in silences {
        let mut next = Vec::with_capacity(spans.len() + 1);
        for span in spans {
            if silence.end <= span.start || silence.start >= span.end {
                next.push(span);
                continue;
            }
            if silence.start > span.start {
                next.push(Span {
                    start: span.start,
                    end: silence.start,
                });
            }
            if silence.end < span.end {
                next.push(Span {
                    start: silence.end,
                    end: span.end,
                });
            }
        }
        spans = next;
        if spans.is_empty() {
            break;
        }
    }
    spans.retain(|s| s.end > s.start);
    spans
}

/// Short fragments are folded into the next fragment, or the previous one
/// when last.
fn merge_short_spans(spans: &mut Vec<Span>, min_segment: Duration) {
    while spans.len() > 1 {
        let Some(idx) = spans.iter().position(|s| s.len() < min_segment) else {
            break;
        };
        let span = spans.remove(idx);
        if idx < spans.len() {
            spans[idx].start = span.start;
        } else {
            spans[idx - 1].end = span.end;
        }
    }
}

/// Merge the smallest span into its predecessor until `target` remain.
fn merge_to_count(spans: &mut Vec<Span>, target: usize) {
    while spans.len() > target && spans.len() > 1 {
        let idx = spans
            .iter()
            .enumerate()
            .min_by_key(|(_, s)| s.len())
            .map_or(0, |(i, _)| i);
        let span = spans.remove(idx);
        if idx == 0 {
            spans[0].start = span.start;
        } else {
            spans[idx - 1].end = span.end;
        }
    }
}

fn tiny_index<S: AsRef<str>>(words: &[S], counts: &[usize]) -> Option<usize> {
    let mut cursor = 0;
    for (i, &count) in counts.iter().enumerate() {
        let count = count.min(words.len() - cursor);
        if count == 0 {
            continue;
        }
        if is_tiny_segment(&words[cursor..cursor + count]) {
            return Some(i);
        }
        cursor += count;
    }
    None
}

/// Distribute `total` words over segments in proportion to their
/// durations. Every segment gets at least one word while enough remain and
/// the last segment takes the rest, so the counts always sum to `total`.
pub fn allocate_counts(total: usize, durations: &[Duration]) -> Vec<usize> {
    let mut counts = vec![0; durations.len()];
    if total == 0 || durations.is_empty() {
        return counts;
    }

    let mut remaining_words = total as i64;
    let mut remaining_dur: Duration = durations.iter().sum();
    for (i, &duration) in durations.iter().enumerate() {
        let segments_left = (durations.len() - i) as i64;
        if segments_left <= 1 {
            counts[i] = remaining_words.max(0) as usize;
            break;
        }
        let max_allowed = remaining_words - (segments_left - 1);
        let count = if remaining_dur.is_zero() {
            max_allowed.max(1)
        } else {
            let ratio = duration.as_secs_f64() / remaining_dur.as_secs_f64();
            let target = (remaining_words as f64 * ratio).round() as i64;
            target.max(1).min(max_allowed)
        };
        let count = count.clamp(0, remaining_words.max(0));
        counts[i] = count as usize;
        remaining_words -= count;
        remaining_dur = remaining_dur.saturating_sub(duration);
    }
    counts
}

/// Join `words` into one string per count; words left over are appended
/// to the last part.
fn split_text_by_counts<S: AsRef<str>>(words: &[S], counts: &[usize]) -> Vec<String> {
    let mut parts = Vec::with_capacity(counts.len());
    let mut cursor = 0;
    for &count in counts {
        let count = count.min(words.len() - cursor);
        parts.push(join(&words[cursor..cursor + count]));
        cursor += count;
    }
    if cursor < words.len() {
        if let Some(last) = parts.last_mut() {
            let rest = join(&words[cursor..]);
            *last = if last.is_empty() {
                rest
            } else {
                format!("{last} {rest}")
            };
        }
    }
    parts
}

fn join<S: AsRef<str>>(words: &[S]) -> String {
    words.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(" ")
}

/// Build the fragment timings in order, never overlapping and never leaving
/// the verse interval.
fn assemble(
    timing: &Timing,
    words: &[&str],
    fragments: &Fragments,
    carried: Vec<Vec<WordTiming>>,
) -> Vec<Timing> {
    let arabic = split_text_by_counts(words, &fragments.counts);
    let translation_words: Vec<&str> = timing.verse.translation.split_whitespace().collect();
    let durations: Vec<Duration> = fragments.spans.iter().map(Span::len).collect();
    let translation = if translation_words.is_empty() {
        Vec::new()
    } else {
        split_text_by_counts(
            &translation_words,
            &allocate_counts(translation_words.len(), &durations),
        )
    };

    let upper = timing.end.max(timing.start);
    let mut prev_end = timing.start;
    fragments
        .spans
        .iter()
        .zip(carried)
        .enumerate()
        .map(|(i, (span, word_timings))| {
            let mut verse = timing.verse.clone();
            if let Some(text) = arabic.get(i).filter(|t| !t.is_empty()) {
                verse.text = text.clone();
            }
            if let Some(text) = translation.get(i) {
                verse.translation = text.clone();
            }
            let start = span.start.max(prev_end).min(upper);
            let end = span.end.max(start).min(upper);
            prev_end = end;
            Timing {
                verse,
                start,
                end,
                word_timings,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quran::Verse;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn silence(start: u64, end: u64) -> Silence {
        Silence {
            start: ms(start),
            end: ms(end),
        }
    }

    fn timing(text: &str, translation: &str, start: u64, end: u64) -> Timing {
        Timing {
            verse: Verse {
                number: 7,
                number_in_surah: 7,
                text: text.to_string(),
                translation: translation.to_string(),
                ..Default::default()
            },
            start: ms(start),
            end: ms(end),
            word_timings: Vec::new(),
        }
    }

    fn with_words(mut timing: Timing, spans: &[(u64, u64)]) -> Timing {
        let words: Vec<String> = timing
            .verse
            .text
            .split_whitespace()
            .map(str::to_string)
            .collect();
        timing.word_timings = words
            .into_iter()
            .zip(spans)
            .map(|(word, &(start, end))| WordTiming {
                word,
                start: ms(start),
                end: ms(end),
            })
            .collect();
        timing
    }

    fn assert_ordered(timings: &[Timing]) {
        for t in timings {
            assert!(t.end >= t.start);
        }
        for pair in timings.windows(2) {
            assert!(pair[0].end <= pair[1].start);
        }
    }

    fn arabic_words(timings: &[Timing]) -> Vec<String> {
        timings
            .iter()
            .flat_map(|t| t.verse.text.split_whitespace().map(str::to_string))
            .collect()
    }

    #[test]
    fn allocation_sums_to_total_with_at_least_one_each() {
        let cases: Vec<(usize, Vec<u64>)> = vec![
            (10, vec![1000, 1000]),
            (7, vec![100, 5000, 100]),
            (3, vec![0, 0, 0]),
            (12, vec![1, 2, 3, 4, 5]),
            (5, vec![4000, 10, 10, 10, 10]),
        ];
        for (total, durations) in cases {
            let durations: Vec<Duration> = durations.into_iter().map(ms).collect();
            let counts = allocate_counts(total, &durations);
            assert_eq!(counts.len(), durations.len());
            assert_eq!(counts.iter().sum::<usize>(), total, "{counts:?}");
            assert!(counts.iter().all(|&c| c >= 1), "{counts:?}");
        }
    }

    #[test]
    fn allocation_follows_durations() {
        assert_eq!(allocate_counts(10, &[ms(1000), ms(1000)]), vec![5, 5]);
        assert_eq!(allocate_counts(8, &[ms(3000), ms(1000)]), vec![6, 2]);
        assert_eq!(allocate_counts(0, &[ms(1000)]), vec![0]);
        assert!(allocate_counts(4, &[]).is_empty());
    }

    #[test]
    fn text_leftovers_join_the_last_part() {
        let words = ["a", "b", "c", "d"];
        assert_eq!(split_text_by_counts(&words, &[1, 1]), vec!["a", "b c d"]);
        assert_eq!(split_text_by_counts(&words, &[3, 5]), vec!["a b c", "d"]);
    }

    #[test]
    fn splits_at_pause_between_words() {
        let timing = with_words(
            timing(
                "الحمد لله رب العالمين",
                "all praise is due to Allah",
                0,
                4500,
            ),
            &[(0, 1000), (1000, 2000), (2500, 3500), (3500, 4500)],
        );
        let split = split_on_silence(vec![timing], &[silence(2000, 2500)], DEFAULT_MIN_SEGMENT);

        assert_eq!(split.len(), 2);
        assert_eq!(split[0].verse.text, "الحمد لله");
        assert_eq!(split[1].verse.text, "رب العالمين");
        assert_eq!((split[0].start, split[0].end), (ms(0), ms(2000)));
        assert_eq!((split[1].start, split[1].end), (ms(2500), ms(4500)));
        assert_eq!(split[0].verse.translation, "all praise is");
        assert_eq!(split[1].verse.translation, "due to Allah");
        assert_eq!(split[0].word_timings.len(), 2);
        assert_eq!(split[1].word_timings[0].word, "رب");
        assert_eq!(split[1].verse.number, 7);
        assert_ordered(&split);
    }

    #[test]
    fn cut_leaving_tiny_fragment_falls_back_to_time() {
        // the only cut would strand the single-letter last word
        let timing = with_words(
            timing("الحمد لله و", "", 0, 3000),
            &[(0, 1000), (1000, 2000), (2200, 3000)],
        );
        let split = split_on_silence(vec![timing], &[silence(2000, 2200)], DEFAULT_MIN_SEGMENT);
        assert_eq!(arabic_words(&split), vec!["الحمد", "لله", "و"]);
        assert_ordered(&split);
    }

    #[test]
    fn splits_by_time_without_word_timings() {
        let timing = timing("قل هو الله أحد", "say he is Allah", 0, 4000);
        let split = split_on_silence(vec![timing], &[silence(1900, 2100)], DEFAULT_MIN_SEGMENT);

        assert_eq!(split.len(), 2);
        assert_eq!((split[0].start, split[0].end), (ms(0), ms(1900)));
        assert_eq!((split[1].start, split[1].end), (ms(2100), ms(4000)));
        assert_eq!(split[0].verse.text, "قل هو");
        assert_eq!(split[1].verse.text, "الله أحد");
        assert_eq!(split[0].verse.translation, "say he");
        assert!(split.iter().all(|t| t.word_timings.is_empty()));
    }

    #[test]
    fn segment_count_is_capped_by_translation_words() {
        let timing = timing("قل هو الله أحد", "say it", 0, 6000);
        let silences = [silence(1000, 1200), silence(3000, 3200), silence(4500, 4700)];
        let split = split_on_silence(vec![timing], &silences, DEFAULT_MIN_SEGMENT);
        assert_eq!(split.len(), 2);
        assert_eq!(arabic_words(&split).len(), 4);
        assert_ordered(&split);
    }

    #[test]
    fn short_fragment_merges_and_keeps_timing() {
        let original = timing("قل هو الله أحد", "", 0, 4000);
        let split = split_on_silence(
            vec![original.clone()],
            &[silence(50, 500)],
            DEFAULT_MIN_SEGMENT,
        );
        assert_eq!(split, vec![original]);
    }

    #[test]
    fn timings_without_silence_are_untouched() {
        let timings = vec![
            timing("قل هو الله أحد", "", 0, 2000),
            timing("الله الصمد", "", 2000, 3000),
        ];
        let split = split_on_silence(timings.clone(), &[silence(5000, 5500)], DEFAULT_MIN_SEGMENT);
        assert_eq!(split, timings);
        assert_eq!(split_on_silence(timings.clone(), &[], DEFAULT_MIN_SEGMENT), timings);
    }

    #[test]
    fn arabic_words_are_conserved_across_many_pauses() {
        let timings = vec![
            timing("بسم الله الرحمن الرحيم", "in the name of Allah", 0, 3000),
            timing(
                "الحمد لله رب العالمين الرحمن الرحيم",
                "praise be to the lord of the worlds",
                3000,
                9000,
            ),
        ];
        let silences = [
            silence(1400, 1600),
            silence(2950, 3100),
            silence(4000, 4300),
            silence(6000, 6200),
            silence(7800, 8000),
        ];
        let before = arabic_words(&timings);
        let split = split_on_silence(timings, &silences, DEFAULT_MIN_SEGMENT);
        assert_eq!(arabic_words(&split), before);
        assert!(split.len() > 2);
        assert_ordered(&split);
    }
}
