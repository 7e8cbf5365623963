//! Name normalisation: raw extraction string -> comparison/display key.
//!
//! - Trim surrounding whitespace.
//! - Short all-caps strings (≤ 5 chars) are acronyms and kept verbatim
//!   ("IBM", "AWS", "AT&T").
//! - Everything else is title-cased.
//!
//! Total, pure and idempotent: `normalize(normalize(x)) == normalize(x)`.

/// Longest string (in chars) still treated as an acronym.
const ACRONYM_MAX_CHARS: usize = 5;

pub fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    if is_acronym(trimmed) {
        return trimmed.to_string();
    }
    title_case(trimmed)
}

/// At most [`ACRONYM_MAX_CHARS`] chars, at least one cased char, and no
/// lower-case char.
fn is_acronym(s: &str) -> bool {
    s.chars().count() <= ACRONYM_MAX_CHARS
        && s.chars().any(is_cased)
        && !s.chars().any(char::is_lowercase)
}

fn is_cased(c: char) -> bool {
    c.is_uppercase() || c.is_lowercase()
}

/// Upper-case a cased char that follows an uncased one, lower-case the rest.
///
/// Only one-to-one case mappings are applied; a char whose mapping expands
/// ("ß" -> "SS") is kept as is.  Output therefore has the same char count as
/// the input and a second pass reproduces the first.
fn title_case(s: &str) -> String {
    let mut prev_cased = false;
    s.chars()
        .map(|c| {
            let mapped = if !is_cased(c) {
                c
            } else if prev_cased {
                single(c.to_lowercase()).unwrap_or(c)
            } else {
                single(c.to_uppercase()).unwrap_or(c)
            };
            prev_cased = is_cased(mapped);
            mapped
        })
        .collect()
}

fn single(mut mapping: impl Iterator<Item = char>) -> Option<char> {
    match (mapping.next(), mapping.next()) {
        (Some(c), None) => Some(c),
        _ => None,
    }
}
