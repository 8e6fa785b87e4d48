//! Fuzzy comparison of an expected sentence against a spoken transcript.
//!
//! The score blends word overlap (70%) with character-level edit similarity (30%) and is
//! reported as an integer percentage. It is a heuristic, not a linguistic measure.

use std::collections::HashSet;

const WORD_WEIGHT: f64 = 0.7;
const CHAR_WEIGHT: f64 = 0.3;

/// Similarity of `actual` to `expected` in `0..=100`.
pub fn similarity(expected: &str, actual: &str) -> u32 {
    let expected = normalize(expected);
    let actual = normalize(actual);
    if expected.is_empty() || actual.is_empty() {
        return 0;
    }
    if expected == actual {
        return 100;
    }

    let combined = WORD_WEIGHT * word_overlap(&expected, &actual)
        + CHAR_WEIGHT * char_similarity(&expected, &actual);
    (combined * 100.0).round().clamp(0.0, 100.0) as u32
}

/// Lowercases, drops punctuation and collapses runs of whitespace.
pub fn normalize(text: &str) -> String {
    let stripped: String = text
        .chars()
        .filter_map(|ch| {
            if ch.is_alphanumeric() {
                Some(ch.to_lowercase().collect::<String>())
            } else if ch.is_whitespace() {
                Some(" ".to_string())
            } else {
                None
            }
        })
        .collect();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Share of distinct expected words that occur in `actual`.
fn word_overlap(expected: &str, actual: &str) -> f64 {
    let expected_words: HashSet<&str> = expected.split_whitespace().collect();
    if expected_words.is_empty() {
        return 0.0;
    }
    let actual_words: HashSet<&str> = actual.split_whitespace().collect();
    let shared = expected_words.intersection(&actual_words).count();
    shared as f64 / expected_words.len() as f64
}

fn char_similarity(expected: &str, actual: &str) -> f64 {
    let longest = expected.chars().count().max(actual.chars().count());
    if longest == 0 {
        return 0.0;
    }
    1.0 - levenshtein(expected, actual) as f64 / longest as f64
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let m = a_chars.len();
    let n = b_chars.len();

    if m == 0 {
        return n;
    }
    if n == 0 {
        return m;
    }

    // Two rows are enough.
    let mut prev = (0..=n).collect::<Vec<usize>>();
    let mut curr = vec![0usize; n + 1];

    for i in 1..=m {
        curr[0] = i;
        for j in 1..=n {
            let cost = if a_chars[i - 1] == b_chars[j - 1] { 0 } else { 1 };
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[n]
}
