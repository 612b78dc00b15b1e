//! Correction of unmatched numeric claims.
//!
//! Rewrites response text so it no longer asserts numbers the tool output
//! does not support. Two policies:
//!
//! - [`CorrectionPolicy::Substitute`] – replace the claimed number with the
//!   nearest tool-sourced value for its field.
//! - [`CorrectionPolicy::Flag`] – leave the number in place but wrap the
//!   claim in an uncertainty marker.
//!
//! A substitution value always comes from the tool results; when an unmatched
//! claim has no candidate field at all (empty tool results), substitution
//! falls back to flagging, because there is nothing truthful to substitute.
//!
//! # Example
//!
//! ```rust
//! use engram_types::ToolResults;
//! use engram_validator::checker::validate_response;
//! use engram_validator::correction::{CorrectionPolicy, correct};
//!
//! let results: ToolResults =
//!     [("heart_rate".to_string(), serde_json::json!(95))].into_iter().collect();
//! let mut report = validate_response("Your heart rate was 130 bpm", &results, 0.10);
//! assert!(!report.passed);
//!
//! let fixed = correct("Your heart rate was 130 bpm", &mut report, CorrectionPolicy::Substitute);
//! assert_eq!(fixed, "Your heart rate was 95 bpm");
//! ```

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::checker::{MatchState, ValidationReport};

/// How unmatched claims are rewritten.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrectionPolicy {
    /// Replace the claimed number with the nearest tool-sourced value.
    #[default]
    Substitute,
    /// Wrap the claim in an `[unverified: …]` marker.
    Flag,
}

/// Rewrite every [`MatchState::Unmatched`] claim in `text` per `policy`.
///
/// Affected checks move to [`MatchState::Corrected`] and the rewritten text
/// is also recorded on the report. Matched claims are left untouched.
pub fn correct(text: &str, report: &mut ValidationReport, policy: CorrectionPolicy) -> String {
    // Collect edits first, then apply back-to-front so earlier spans stay valid.
    let mut edits: Vec<(std::ops::Range<usize>, String)> = Vec::new();

    for check in &mut report.checks {
        if check.state != MatchState::Unmatched {
            continue;
        }
        let claim_end = check
            .claim
            .unit_span
            .as_ref()
            .map(|r| r.end)
            .unwrap_or(check.claim.span.end);

        match (policy, check.nearest_value) {
            (CorrectionPolicy::Substitute, Some(value)) => {
                info!(
                    claimed = check.claim.value,
                    substituted = value,
                    field = check.nearest_field.as_deref().unwrap_or(""),
                    "substituting unsupported numeric claim"
                );
                edits.push((check.claim.span.clone(), format_value(value)));
            }
            _ => {
                // Flag policy, or nothing truthful to substitute.
                let claimed = &text[check.claim.span.start..claim_end];
                info!(claimed, "flagging unsupported numeric claim");
                edits.push((
                    check.claim.span.start..claim_end,
                    format!("[unverified: {claimed}]"),
                ));
            }
        }
        check.state = MatchState::Corrected;
    }

    let mut corrected = text.to_string();
    edits.sort_by(|a, b| b.0.start.cmp(&a.0.start));
    for (range, replacement) in edits {
        corrected.replace_range(range, &replacement);
    }
    report.corrected_text = Some(corrected.clone());
    corrected
}

/// Render a tool value the way it would naturally appear in prose: integers
/// without a trailing `.0`, fractions as-is.
fn format_value(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::validate_response;
    use engram_types::ToolResults;

    fn results(pairs: &[(&str, serde_json::Value)]) -> ToolResults {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn substitute_replaces_with_tool_value() {
        let tools = results(&[("heart_rate", serde_json::json!(95))]);
        let text = "Your heart rate was 130 bpm";
        let mut report = validate_response(text, &tools, 0.10);

        let fixed = correct(text, &mut report, CorrectionPolicy::Substitute);
        assert_eq!(fixed, "Your heart rate was 95 bpm");
        assert_eq!(report.checks[0].state, MatchState::Corrected);
        assert_eq!(report.corrected_text.as_deref(), Some("Your heart rate was 95 bpm"));
    }

    #[test]
    fn flag_wraps_claim_with_marker() {
        let tools = results(&[("heart_rate", serde_json::json!(95))]);
        let text = "Your heart rate was 130 bpm";
        let mut report = validate_response(text, &tools, 0.10);

        let fixed = correct(text, &mut report, CorrectionPolicy::Flag);
        assert_eq!(fixed, "Your heart rate was [unverified: 130 bpm]");
        assert_eq!(report.checks[0].state, MatchState::Corrected);
    }

    #[test]
    fn matched_claims_are_left_untouched() {
        let tools = results(&[("heart_rate", serde_json::json!(87))]);
        let text = "Your heart rate was 87 bpm";
        let mut report = validate_response(text, &tools, 0.10);

        let fixed = correct(text, &mut report, CorrectionPolicy::Substitute);
        assert_eq!(fixed, text);
        assert_eq!(report.checks[0].state, MatchState::Exact);
    }

    #[test]
    fn substitution_only_uses_tool_sourced_values() {
        let tools = results(&[("steps", serde_json::json!(9500))]);
        let text = "You walked 12000 steps";
        let mut report = validate_response(text, &tools, 0.10);

        let fixed = correct(text, &mut report, CorrectionPolicy::Substitute);
        assert_eq!(fixed, "You walked 9500 steps");
    }

    #[test]
    fn empty_tool_results_fall_back_to_flagging() {
        let text = "You walked 12000 steps";
        let mut report = validate_response(text, &ToolResults::new(), 0.10);

        let fixed = correct(text, &mut report, CorrectionPolicy::Substitute);
        assert_eq!(fixed, "You walked [unverified: 12000 steps]");
        assert_eq!(report.checks[0].state, MatchState::Corrected);
    }

    #[test]
    fn multiple_unmatched_claims_are_all_corrected() {
        let tools = results(&[
            ("heart_rate", serde_json::json!(90)),
            ("steps", serde_json::json!(8000)),
        ]);
        let text = "Peaks of 150 bpm across 20000 steps";
        let mut report = validate_response(text, &tools, 0.10);
        assert_eq!(report.count(MatchState::Unmatched), 2);

        let fixed = correct(text, &mut report, CorrectionPolicy::Substitute);
        assert_eq!(fixed, "Peaks of 90 bpm across 8000 steps");
        assert_eq!(report.count(MatchState::Corrected), 2);
    }

    #[test]
    fn fractional_substitution_keeps_fraction() {
        let tools = results(&[("sleep_hours", serde_json::json!(7.5))]);
        let text = "You slept 9 hours";
        let mut report = validate_response(text, &tools, 0.10);

        let fixed = correct(text, &mut report, CorrectionPolicy::Substitute);
        assert_eq!(fixed, "You slept 7.5 hours");
    }

    #[test]
    fn format_value_renders_integers_cleanly() {
        assert_eq!(format_value(95.0), "95");
        assert_eq!(format_value(7.5), "7.5");
        assert_eq!(format_value(-3.0), "-3");
    }
}
