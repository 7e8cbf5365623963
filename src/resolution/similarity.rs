//! Token-sort similarity between two normalised names.
//!
//! Tokens are split on whitespace, sorted and re-joined with single spaces,
//! then compared with the indel ratio over chars:
//!
//! ```text
//! score = 100 * 2 * LCS(a, b) / (len(a) + len(b))
//! ```
//!
//! The longest common subsequence comes from a Myers diff of the two char
//! sequences (`similar`), whose `Equal` runs sum to the LCS length.  The
//! score is symmetric, lies in `[0, 100]`, and `score(a, a) == 100`.

use similar::{Algorithm, DiffOp, capture_diff_slices};

/// Similarity of two names in `[0, 100]`, insensitive to token order.
pub fn token_sort_ratio(a: &str, b: &str) -> f64 {
    ratio(&sort_tokens(a), &sort_tokens(b))
}

fn sort_tokens(s: &str) -> Vec<char> {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ").chars().collect()
}

fn ratio(a: &[char], b: &[char]) -> f64 {
    let total = a.len() + b.len();
    if total == 0 {
        return 100.0;
    }
    let common: usize = capture_diff_slices(Algorithm::Myers, a, b)
        .iter()
        .map(|op| match op {
            DiffOp::Equal { len, .. } => *len,
            _ => 0,
        })
        .sum();
    100.0 * (2 * common) as f64 / total as f64
}
