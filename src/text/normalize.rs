use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    /// Nonspacing marks, punctuation, symbols and tatweel (U+0640).
    static ref DROPPED: Regex =
        Regex::new(r"[\p{Mn}\p{P}\p{S}\x{0640}]").expect("valid dropped-character class");
}

/// Single-letter prefixes that transcription often splits off or glues on.
const CLITICS: [char; 6] = ['و', 'ف', 'ب', 'ل', 'ك', 'س'];

fn canonical_letter(c: char) -> char {
    match c {
        'أ' | 'إ' | 'آ' | 'ٱ' => 'ا',
        'ى' => 'ي',
        'ؤ' => 'و',
        'ئ' => 'ي',
        other => other,
    }
}

/// Strip diacritics, tatweel, punctuation and symbols, fold case, unify
/// Arabic letter variants and collapse whitespace to single spaces.
pub fn normalize(text: &str) -> String {
    let stripped = DROPPED.replace_all(text, "");
    let mut out = String::with_capacity(stripped.len());
    let mut pending_space = false;

    for c in stripped.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        for lower in c.to_lowercase() {
            out.push(canonical_letter(lower));
        }
    }

    out
}

/// Normalized form with all spaces removed, used as a comparison key.
pub fn normalize_for_match(word: &str) -> String {
    normalize(word).chars().filter(|c| !c.is_whitespace()).collect()
}

/// Normalized tokens of `text` in reading order.
pub fn tokens(text: &str) -> Vec<String> {
    normalize(text)
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

pub fn is_clitic(normalized: &str) -> bool {
    let mut chars = normalized.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => CLITICS.contains(&c),
        _ => false,
    }
}

/// Number of letter-bearing codepoints in `word`.
pub fn word_len(word: &str) -> usize {
    DROPPED
        .replace_all(word, "")
        .chars()
        .filter(|c| !c.is_whitespace())
        .count()
}

/// A segment is too small to stand alone when it has no words or a single
/// word with at most one letter.
pub fn is_tiny_segment<S: AsRef<str>>(words: &[S]) -> bool {
    match words {
        [] => true,
        [only] => word_len(only.as_ref()) <= 1,
        _ => false,
    }
}
