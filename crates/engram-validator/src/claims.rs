//! Numeric claim extraction.
//!
//! Scans generated text for numbers, with or without an adjacent unit from a
//! fixed domain vocabulary, and yields them lazily as [`NumericClaim`]s. The
//! extractor is restartable and never mutates its input.
//!
//! # Example
//!
//! ```rust
//! use engram_validator::claims::{Unit, extract_claims};
//!
//! let claims: Vec<_> = extract_claims("Your heart rate was 87 bpm").collect();
//! assert_eq!(claims.len(), 1);
//! assert_eq!(claims[0].value, 87.0);
//! assert_eq!(claims[0].unit, Some(Unit::Bpm));
//! ```

use std::ops::Range;
use std::sync::LazyLock;

use regex::{CaptureMatches, Regex};
use serde::{Deserialize, Serialize};

/// Characters of surrounding context captured on each side of a claim.
const CONTEXT_WINDOW: usize = 30;

// A number must not be glued to a preceding identifier character, so version
// strings ("v1.2.3") and symbol names stay invisible. The optional trailing
// word is resolved against the unit vocabulary afterwards.
static CLAIM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^0-9A-Za-z.])(?P<value>-?\d+(?:\.\d+)?)(?:[ \t]*(?P<unit>%|[A-Za-z]+))?")
        .expect("claim regex compiles")
});

// ─────────────────────────────────────────────────────────────────────────────
// Unit vocabulary
// ─────────────────────────────────────────────────────────────────────────────

/// Fixed vocabulary of domain units recognised next to a numeric claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unit {
    /// Heart rate, beats per minute.
    Bpm,
    Kilograms,
    Pounds,
    Percent,
    Steps,
    Kilocalories,
    Hours,
    /// Dimensionless quality scores and indices (sleep score, readiness).
    Score,
}

impl Unit {
    /// Resolve a token adjacent to a number into a unit, if it is one.
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "bpm" => Some(Unit::Bpm),
            "kg" | "kgs" | "kilogram" | "kilograms" => Some(Unit::Kilograms),
            "lb" | "lbs" | "pound" | "pounds" => Some(Unit::Pounds),
            "%" | "percent" => Some(Unit::Percent),
            "step" | "steps" => Some(Unit::Steps),
            "kcal" | "calorie" | "calories" => Some(Unit::Kilocalories),
            "hour" | "hours" | "hrs" => Some(Unit::Hours),
            "score" | "points" => Some(Unit::Score),
            _ => None,
        }
    }

    /// Substrings that identify tool-result fields carrying this unit. Used
    /// to narrow the ground-truth search when a claim has a unit hint.
    pub fn field_keywords(&self) -> &'static [&'static str] {
        match self {
            Unit::Bpm => &["heart_rate", "bpm", "pulse"],
            Unit::Kilograms => &["weight", "kg", "mass"],
            Unit::Pounds => &["weight", "lb"],
            Unit::Percent => &["percent", "pct", "spo2", "saturation"],
            Unit::Steps => &["steps"],
            Unit::Kilocalories => &["calories", "kcal", "energy"],
            Unit::Hours => &["hours", "sleep", "duration"],
            Unit::Score => &["score", "index"],
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// NumericClaim
// ─────────────────────────────────────────────────────────────────────────────

/// One numeric claim found in generated text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericClaim {
    /// The claimed value.
    pub value: f64,
    /// Recognised unit, when the adjacent token is in the vocabulary.
    pub unit: Option<Unit>,
    /// Byte range of the numeric token within the source text.
    pub span: Range<usize>,
    /// Byte range of the unit token, when one was recognised.
    pub unit_span: Option<Range<usize>>,
    /// Surrounding snippet for logs and uncertainty markers.
    pub window: String,
}

// ─────────────────────────────────────────────────────────────────────────────
// ClaimExtractor
// ─────────────────────────────────────────────────────────────────────────────

/// Lazy iterator over the numeric claims in a piece of text.
///
/// Obtained from [`extract_claims`]; each call produces a fresh, restartable
/// pass over the same input.
pub struct ClaimExtractor<'t> {
    text: &'t str,
    matches: CaptureMatches<'static, 't>,
}

impl<'t> Iterator for ClaimExtractor<'t> {
    type Item = NumericClaim;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let caps = self.matches.next()?;
            let value_match = match caps.name("value") {
                Some(m) => m,
                None => continue,
            };
            let Ok(value) = value_match.as_str().parse::<f64>() else {
                continue;
            };
            let (unit, unit_span) = caps
                .name("unit")
                .and_then(|m| Unit::from_token(m.as_str()).map(|u| (Some(u), Some(m.range()))))
                .unwrap_or((None, None));

            let span = value_match.range();
            let window_end = unit_span.as_ref().map(|r| r.end).unwrap_or(span.end);
            return Some(NumericClaim {
                value,
                unit,
                unit_span,
                window: context_window(self.text, span.start, window_end),
                span,
            });
        }
    }
}

/// Begin a lazy extraction pass over `text`.
pub fn extract_claims(text: &str) -> ClaimExtractor<'_> {
    ClaimExtractor {
        text,
        matches: CLAIM_RE.captures_iter(text),
    }
}

fn context_window(text: &str, start: usize, end: usize) -> String {
    let mut from = start.saturating_sub(CONTEXT_WINDOW);
    while !text.is_char_boundary(from) {
        from -= 1;
    }
    let mut to = (end + CONTEXT_WINDOW).min(text.len());
    while !text.is_char_boundary(to) {
        to += 1;
    }
    text[from..to].to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
