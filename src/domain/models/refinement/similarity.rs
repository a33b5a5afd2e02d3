//! Lexical similarity used for issue deduplication and the built-in
//! entailment heuristic.

use std::collections::HashSet;

/// Lowercase and collapse whitespace.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn bigrams(text: &str) -> HashSet<(char, char)> {
    text.chars()
        .collect::<Vec<_>>()
        .windows(2)
        .map(|w| (w[0], w[1]))
        .collect()
}

/// Jaccard similarity of character bigrams after normalisation.
///
/// Robust to small wording and punctuation differences between judges
/// describing the same problem. Returns 1.0 for equal normalised strings and
/// 0.0 when either side is too short to form a bigram.
pub fn bigram_jaccard(a: &str, b: &str) -> f64 {
    let a = normalize(a);
    let b = normalize(b);
    if a == b {
        return 1.0;
    }

    let bigrams_a = bigrams(&a);
    let bigrams_b = bigrams(&b);
    let union = bigrams_a.union(&bigrams_b).count();
    if union == 0 {
        return 0.0;
    }

    bigrams_a.intersection(&bigrams_b).count() as f64 / union as f64
}

/// Content words of a text: lowercase alphanumeric tokens longer than three
/// characters.
pub fn content_words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.chars().count() > 3)
        .map(str::to_lowercase)
        .collect()
}
