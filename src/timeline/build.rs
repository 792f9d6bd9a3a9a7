use std::time::Duration;

use super::{Timing, TimelineError};
use crate::align::WordTiming;
use crate::audio::AudioSegment;
use crate::quran::Verse;

/// Lay verses back to back using the segment durations, splitting every
/// verse evenly across its whitespace separated words.
pub fn build_timings(
    verses: &[Verse],
    segments: &[AudioSegment],
) -> Result<Vec<Timing>, TimelineError> {
    if verses.len() != segments.len() {
        return Err(TimelineError::CountMismatch {
            verses: verses.len(),
            segments: segments.len(),
        });
    }

    let mut cursor = Duration::ZERO;
    let timings = verses
        .iter()
        .zip(segments)
        .map(|(verse, segment)| {
            let start = cursor;
            let end = cursor + segment.duration;
            cursor = end;
            Timing {
                verse: verse.clone(),
                start,
                end,
                word_timings: even_word_timings(&verse.text, start, end),
            }
        })
        .collect();
    Ok(timings)
}

fn even_word_timings(text: &str, start: Duration, end: Duration) -> Vec<WordTiming> {
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.is_empty() {
        return Vec::new();
    }
    let per_word = (end - start) / words.len() as u32;
    let last = words.len() - 1;
    let mut cursor = start;
    words
        .into_iter()
        .enumerate()
        .map(|(i, word)| {
            let word_end = if i == last { end } else { cursor + per_word };
            let timing = WordTiming {
                word: word.to_string(),
                start: cursor,
                end: word_end,
            };
            cursor = word_end;
            timing
        })
        .collect()
}

fn verse_weight(verse: &Verse) -> u32 {
    let words = verse.text.split_whitespace().count();
    let weight = if words > 0 {
        words
    } else {
        verse.text.chars().count() / 3
    };
    u32::try_from(weight).unwrap_or(u32::MAX).max(1)
}

/// Apportion `total` across verses by word count when no per-verse audio
/// exists. The last verse absorbs the rounding remainder.
pub fn segments_from_duration(verses: &[Verse], total: Duration) -> Vec<AudioSegment> {
    if verses.is_empty() {
        return Vec::new();
    }
    let weights: Vec<u32> = verses.iter().map(verse_weight).collect();
    let total_weight: u32 = weights.iter().sum();
    let portion = total / total_weight.max(1);

    let last = verses.len() - 1;
    let mut remaining = total;
    verses
        .iter()
        .zip(weights)
        .enumerate()
        .map(|(i, (verse, weight))| {
            let duration = if i == last {
                remaining
            } else {
                (portion * weight).min(remaining)
            };
            remaining -= duration;
            AudioSegment {
                ayah_number: verse.number,
                path: None,
                duration,
            }
        })
        .collect()
}
