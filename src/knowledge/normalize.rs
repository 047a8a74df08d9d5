//! Spelling normalization for Sorani queries and patterns.

/// Character-level folds applied after lowercasing. Each maps a
/// typographic variant onto the canonical Sorani letter.
const FOLDS: &[(&str, &str)] = &[
    // heh + zero-width non-joiner, the old way of writing ە
    ("\u{647}\u{200c}", "ە"),
    // heh doachashmee
    ("ھ", "ە"),
    // Arabic yeh
    ("ي", "ی"),
    // Arabic kaf
    ("ك", "ک"),
];

/// Trim, lowercase and fold spelling variants.
pub fn normalize(text: &str) -> String {
    let mut out = text.trim().to_lowercase();
    for (from, to) in FOLDS {
        if out.contains(from) {
            out = out.replace(from, to);
        }
    }
    out
}

/// Whitespace-separated tokens of an already normalized string.
pub fn tokenize(normalized: &str) -> impl Iterator<Item = &str> {
    normalized.split_whitespace()
}
