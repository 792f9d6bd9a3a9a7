use std::time::Duration;

use super::{TimeOffset, Timing};

pub fn has_word_timings(timings: &[Timing]) -> bool {
    timings.iter().any(|t| !t.word_timings.is_empty())
}

/// Starts of every word with a positive duration, in timeline order.
pub fn collect_word_starts(timings: &[Timing]) -> Vec<Duration> {
    timings
        .iter()
        .flat_map(|t| &t.word_timings)
        .filter(|w| w.end > w.start)
        .map(|w| w.start)
        .collect()
}

/// Shift every word by `offset`, keeping it inside its verse.
pub fn apply_word_offset(mut timings: Vec<Timing>, offset: TimeOffset) -> Vec<Timing> {
    if offset.is_zero() {
        return timings;
    }
    for timing in &mut timings {
        let (verse_start, verse_end) = (timing.start, timing.end);
        for word in &mut timing.word_timings {
            let mut start = offset.apply(word.start).max(verse_start);
            let mut end = offset.apply(word.end).max(start);
            if end > verse_end {
                end = verse_end;
                start = start.min(end);
            }
            word.start = start;
            word.end = end;
        }
    }
    timings
}

/// Snap each verse to its first word start and last word end, then clamp
/// the list so it never runs backwards. Returns whether any verse moved.
pub fn apply_ayah_boundaries(mut timings: Vec<Timing>) -> (Vec<Timing>, bool) {
    let mut updated = false;
    for timing in &mut timings {
        let (Some(first), Some(last)) = (timing.word_timings.first(), timing.word_timings.last())
        else {
            continue;
        };
        let start = first.start;
        let end = last.end.max(start);
        if start != timing.start || end != timing.end {
            timing.start = start;
            timing.end = end;
            updated = true;
        }
    }
    if !updated {
        return (timings, false);
    }

    let mut prev_end: Option<Duration> = None;
    for timing in &mut timings {
        if let Some(prev) = prev_end {
            timing.start = timing.start.max(prev);
        }
        timing.end = timing.end.max(timing.start);
        prev_end = Some(timing.end);
    }
    (timings, true)
}

/// Close gaps between consecutive verses so the timeline covers
/// `[0, total]` without holes. A zero `total` leaves the last end alone.
pub fn ensure_continuous(mut timings: Vec<Timing>, total: Duration) -> Vec<Timing> {
    let Some(first) = timings.first_mut() else {
        return timings;
    };
    first.start = Duration::ZERO;

    for i in 0..timings.len() {
        timings[i].end = timings[i].end.max(timings[i].start);
        if i + 1 == timings.len() {
            break;
        }
        let end = timings[i].end;
        let next = &mut timings[i + 1];
        next.start = next.start.max(end);
        let next_start = next.start;
        timings[i].end = next_start;
    }

    if let Some(last) = timings.last_mut() {
        if !total.is_zero() && last.end < total {
            last.end = total;
        }
    }
    timings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::align::WordTiming;
    use crate::quran::Verse;

    fn secs(v: u64) -> Duration {
        Duration::from_secs(v)
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn timing(start: Duration, end: Duration, words: &[(u64, u64)]) -> Timing {
        Timing {
            verse: Verse::default(),
            start,
            end,
            word_timings: words
                .iter()
                .map(|&(s, e)| WordTiming {
                    word: "w".to_string(),
                    start: ms(s),
                    end: ms(e),
                })
                .collect(),
        }
    }

    fn spans(timings: &[Timing]) -> Vec<(Duration, Duration)> {
        timings.iter().map(|t| (t.start, t.end)).collect()
    }

    #[test]
    fn continuity_closes_gaps_and_extends_to_total() {
        let timings = vec![timing(secs(0), secs(1), &[]), timing(secs(3), secs(4), &[])];
        let repaired = ensure_continuous(timings, secs(5));
        assert_eq!(spans(&repaired), vec![(secs(0), secs(3)), (secs(3), secs(5))]);
    }

    #[test]
    fn continuity_resolves_overlap_and_clamps_first_start() {
        let timings = vec![
            timing(ms(200), ms(1500), &[]),
            timing(ms(1000), ms(2000), &[]),
            timing(ms(1900), ms(1800), &[]),
        ];
        let repaired = ensure_continuous(timings, Duration::ZERO);
        assert_eq!(repaired[0].start, Duration::ZERO);
        for pair in repaired.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert!(repaired.iter().all(|t| t.end >= t.start));
        assert_eq!(repaired[2].end, ms(2000));
    }

    #[test]
    fn continuity_on_empty_list() {
        assert!(ensure_continuous(Vec::new(), secs(3)).is_empty());
    }

    #[test]
    fn boundaries_follow_word_timings() {
        let timings = vec![
            timing(secs(0), secs(2), &[(300, 900), (900, 1700)]),
            timing(secs(2), secs(4), &[(1600, 2500), (2600, 3400)]),
            timing(secs(4), secs(5), &[]),
        ];
        let (snapped, changed) = apply_ayah_boundaries(timings);
        assert!(changed);
        assert_eq!(snapped[0].start, ms(300));
        assert_eq!(snapped[0].end, ms(1700));
        // second verse may not start before the first ends
        assert_eq!(snapped[1].start, ms(1700));
        assert_eq!(snapped[1].end, ms(3400));
        assert_eq!(snapped[2].start, secs(4));
        for pair in snapped.windows(2) {
            assert!(pair[1].start >= pair[0].end);
        }
    }

    #[test]
    fn boundaries_report_no_change() {
        let timings = vec![timing(ms(100), ms(900), &[(100, 500), (500, 900)])];
        let (same, changed) = apply_ayah_boundaries(timings.clone());
        assert!(!changed);
        assert_eq!(same, timings);
    }

    #[test]
    fn offset_stays_inside_the_verse() {
        let timings = vec![timing(secs(1), secs(2), &[(1000, 1400), (1400, 1990)])];
        let shifted = apply_word_offset(timings, TimeOffset::from_millis(50));
        let words = &shifted[0].word_timings;
        assert_eq!((words[0].start, words[0].end), (ms(1050), ms(1450)));
        assert_eq!((words[1].start, words[1].end), (ms(1450), secs(2)));

        let timings = vec![timing(secs(1), secs(2), &[(1000, 1400)])];
        let shifted = apply_word_offset(timings, TimeOffset::from_millis(-200));
        let word = &shifted[0].word_timings[0];
        assert_eq!((word.start, word.end), (secs(1), ms(1200)));
    }

    #[test]
    fn offset_past_the_end_collapses_to_verse_end() {
        let timings = vec![timing(secs(1), secs(2), &[(1800, 1900)])];
        let shifted = apply_word_offset(timings, TimeOffset::from_millis(500));
        let word = &shifted[0].word_timings[0];
        assert_eq!((word.start, word.end), (secs(2), secs(2)));
    }

    #[test]
    fn word_starts_skip_empty_words() {
        let timings = vec![
            timing(secs(0), secs(1), &[(0, 400), (400, 400)]),
            timing(secs(1), secs(2), &[(1000, 1500)]),
        ];
        assert_eq!(collect_word_starts(&timings), vec![ms(0), ms(1000)]);
        assert!(has_word_timings(&timings));
        assert!(!has_word_timings(&[timing(secs(0), secs(1), &[])]));
    }
}
