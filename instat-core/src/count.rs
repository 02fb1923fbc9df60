//! Parsing of locale-abbreviated counters such as `12.3k` or `1,204`.

use std::sync::OnceLock;

use regex::Regex;
use thiserror::Error;

const SUFFIXES: [&str; 4] = ["k", "m", "mi", "mil"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CountFormatError {
    #[error("count text is empty")]
    Empty,
    #[error("unrecognized count format: '{0}'")]
    Unrecognized(String),
    #[error("count '{0}' does not fit in 64 bits")]
    Overflow(String),
}

fn count_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\d+)[.,]?(\d+)?(mil|mi|m|k)?$").expect("count pattern is a valid regex")
    })
}

/// Converts displayed count text into an integer.
///
/// Without a magnitude suffix, `.` and `,` are read as thousands separators.
/// With one, a single `.` or `,` separates the fractional part, which is
/// scaled by the suffix: `k` is 10³, `m` and `mi` are 10⁶, `mil` is 10³.
pub fn parse_count_text(text: &str) -> Result<u64, CountFormatError> {
    let mut normalized: String = text
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .collect::<String>()
        .to_lowercase();
    if normalized.is_empty() {
        return Err(CountFormatError::Empty);
    }

    if !SUFFIXES.iter().any(|suffix| normalized.contains(suffix)) {
        normalized.retain(|ch| ch != '.' && ch != ',');
    }

    let captures = count_pattern()
        .captures(&normalized)
        .ok_or_else(|| CountFormatError::Unrecognized(text.to_string()))?;

    let overflow = || CountFormatError::Overflow(text.to_string());
    let int_part: u64 = captures[1].parse().map_err(|_| overflow())?;
    let multiplier: u64 = match captures.get(3).map(|m| m.as_str()) {
        Some("k") | Some("mil") => 1_000,
        Some("m") | Some("mi") => 1_000_000,
        _ => 1,
    };

    let mut total = int_part.checked_mul(multiplier).ok_or_else(overflow)?;
    if let Some(fraction) = captures.get(2) {
        let digits = fraction.as_str();
        let value: u64 = digits.parse().map_err(|_| overflow())?;
        let factor = u32::try_from(digits.len())
            .ok()
            .and_then(|len| 10u64.checked_pow(len))
            .map(|scale| multiplier / scale)
            .unwrap_or(0);
        let scaled = value.checked_mul(factor).ok_or_else(overflow)?;
        total = total.checked_add(scaled).ok_or_else(overflow)?;
    }
    Ok(total)
}

/// Joins a number and a detached suffix token, e.g. `"12.3 k followers"` into `"12.3k"`.
pub fn join_count_tokens(text: &str) -> String {
    let mut tokens = text.split_whitespace();
    let Some(first) = tokens.next() else {
        return String::new();
    };
    let mut raw = first.to_string();
    if let Some(second) = tokens.next() {
        if SUFFIXES.contains(&second.to_lowercase().as_str()) {
            raw.push_str(second);
        }
    }
    raw
}
