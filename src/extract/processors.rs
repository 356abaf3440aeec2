//! String post-processors for extracted field values

use once_cell::sync::Lazy;
use regex::Regex;

static DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+").expect("digit regex is valid"));

/// Returns the first run of ASCII digits as an integer, or 0 when there is none
///
/// Runs too long for an `i64` also yield 0.
pub fn extract_number(raw: &str) -> i64 {
    DIGITS
        .find(raw)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

/// Keeps only digits and dashes
pub fn extract_phone(raw: &str) -> String {
    raw.chars()
        .filter(|c| c.is_ascii_digit() || *c == '-')
        .collect()
}

/// Prefixes root-relative paths with `origin`; everything else is returned as-is
pub fn normalize_url(raw: &str, origin: &str) -> String {
    let raw = raw.trim();
    if raw.starts_with('/') && !raw.starts_with("//") {
        format!("{}{}", origin.trim_end_matches('/'), raw)
    } else {
        raw.to_string()
    }
}
