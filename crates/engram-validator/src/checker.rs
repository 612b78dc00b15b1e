//! Claim-against-ground-truth checking.
//!
//! Every claim extracted from a response is searched for in the flattened
//! tool results. Per claim the outcome is:
//!
//! | state       | condition                                             |
//! |-------------|-------------------------------------------------------|
//! | `Exact`     | a tool value matches within floating-point epsilon    |
//! | `Fuzzy`     | a tool value matches within the relative tolerance    |
//! | `Unmatched` | no tool value is close enough (or there are none)     |
//!
//! The overall report passes iff no claim is `Unmatched`. Empty tool results
//! make every claim `Unmatched` by construction; that is a reported outcome,
//! not a validator fault. Mismatches are logged as data points and never
//! raised as errors.
//!
//! # Example
//!
//! ```rust
//! use engram_types::ToolResults;
//! use engram_validator::checker::{MatchState, validate_response};
//!
//! let results: ToolResults =
//!     [("heart_rate".to_string(), serde_json::json!(87))].into_iter().collect();
//! let report = validate_response("Your heart rate was 87 bpm", &results, 0.10);
//! assert!(report.passed);
//! assert_eq!(report.checks[0].state, MatchState::Exact);
//! ```

use engram_types::ToolResults;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::claims::{NumericClaim, extract_claims};

/// Relative scale below which two values are considered identical.
const FLOAT_EPSILON: f64 = 1e-9;

// ─────────────────────────────────────────────────────────────────────────────
// Report types
// ─────────────────────────────────────────────────────────────────────────────

/// Terminal classification of one claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchState {
    Exact,
    Fuzzy,
    Unmatched,
    /// An unmatched claim that was rewritten by the correction pass.
    Corrected,
}

/// One claim together with the ground-truth field it resolved to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimCheck {
    pub claim: NumericClaim,
    /// Nearest candidate field, recorded even for unmatched claims so the
    /// correction pass has a tool-sourced substitution value.
    pub nearest_field: Option<String>,
    pub nearest_value: Option<f64>,
    pub state: MatchState,
}

/// Outcome of validating one response text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    /// Checks in the order their claims appear in the text.
    pub checks: Vec<ClaimCheck>,
    /// `true` iff no claim is [`MatchState::Unmatched`].
    pub passed: bool,
    /// Set by the correction pass when the text was rewritten.
    pub corrected_text: Option<String>,
}

impl ValidationReport {
    /// Number of claims currently in `state`.
    pub fn count(&self, state: MatchState) -> usize {
        self.checks.iter().filter(|c| c.state == state).count()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Validate every numeric claim in `text` against `tool_results`.
///
/// `tolerance` is the relative tolerance for a fuzzy match (e.g. `0.10`).
/// Unit hints narrow the candidate fields when any field name contains one of
/// the unit's keywords; otherwise all numeric fields are candidates.
pub fn validate_response(text: &str, tool_results: &ToolResults, tolerance: f64) -> ValidationReport {
    let fields = tool_results.numeric_fields();
    let mut checks = Vec::new();

    for claim in extract_claims(text) {
        let check = check_claim(claim, &fields, tolerance);
        if check.state == MatchState::Unmatched {
            warn!(
                value = check.claim.value,
                window = %check.claim.window,
                "numeric claim unsupported by tool results"
            );
        }
        checks.push(check);
    }

    let passed = !checks.iter().any(|c| c.state == MatchState::Unmatched);
    debug!(claims = checks.len(), passed, "validated response");
    ValidationReport {
        checks,
        passed,
        corrected_text: None,
    }
}

fn check_claim(claim: NumericClaim, fields: &[(String, f64)], tolerance: f64) -> ClaimCheck {
    let candidates = narrow_by_unit(&claim, fields);

    let nearest = candidates
        .iter()
        .map(|(name, value)| (name, value, relative_distance(claim.value, *value)))
        .min_by(|a, b| a.2.total_cmp(&b.2));

    match nearest {
        Some((name, value, distance)) => {
            let state = if values_equal(claim.value, *value) {
                MatchState::Exact
            } else if distance <= tolerance {
                MatchState::Fuzzy
            } else {
                MatchState::Unmatched
            };
            ClaimCheck {
                claim,
                nearest_field: Some(name.to_string()),
                nearest_value: Some(*value),
                state,
            }
        }
        None => ClaimCheck {
            claim,
            nearest_field: None,
            nearest_value: None,
            state: MatchState::Unmatched,
        },
    }
}

/// Restrict `fields` to those matching the claim's unit keywords, when the
/// claim has a unit and at least one field matches. Falls back to the full
/// field set otherwise.
fn narrow_by_unit<'f>(claim: &NumericClaim, fields: &'f [(String, f64)]) -> Vec<&'f (String, f64)> {
    if let Some(unit) = claim.unit {
        let narrowed: Vec<_> = fields
            .iter()
            .filter(|(name, _)| {
                let name = name.to_ascii_lowercase();
                unit.field_keywords().iter().any(|kw| name.contains(kw))
            })
            .collect();
        if !narrowed.is_empty() {
            return narrowed;
        }
    }
    fields.iter().collect()
}

fn relative_distance(claimed: f64, actual: f64) -> f64 {
    (claimed - actual).abs() / actual.abs().max(f64::EPSILON)
}

fn values_equal(a: f64, b: f64) -> bool {
    (a - b).abs() <= FLOAT_EPSILON * a.abs().max(b.abs()).max(1.0)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn results(pairs: &[(&str, serde_json::Value)]) -> ToolResults {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn exact_match_passes() {
        let tools = results(&[("heart_rate", serde_json::json!(87))]);
        let report = validate_response("Your heart rate was 87 bpm", &tools, 0.10);
        assert_eq!(report.checks.len(), 1);
        assert_eq!(report.checks[0].state, MatchState::Exact);
        assert_eq!(report.checks[0].nearest_field.as_deref(), Some("heart_rate"));
        assert!(report.passed);
    }

    #[test]
    fn out_of_tolerance_claim_is_unmatched() {
        let tools = results(&[("heart_rate", serde_json::json!(95))]);
        let report = validate_response("Your heart rate was 130 bpm", &tools, 0.10);
        assert_eq!(report.checks[0].state, MatchState::Unmatched);
        // The nearest tool value is still recorded for the correction pass.
        assert_eq!(report.checks[0].nearest_value, Some(95.0));
        assert!(!report.passed);
    }

    #[test]
    fn within_tolerance_claim_is_fuzzy() {
        let tools = results(&[("heart_rate", serde_json::json!(90))]);
        let report = validate_response("Roughly 95 bpm on the climb", &tools, 0.10);
        assert_eq!(report.checks[0].state, MatchState::Fuzzy);
        assert!(report.passed);
    }

    #[test]
    fn empty_tool_results_unmatch_everything() {
        let report = validate_response("You took 9500 steps and slept 7.5 hours", &ToolResults::new(), 0.10);
        assert_eq!(report.checks.len(), 2);
        assert!(report.checks.iter().all(|c| c.state == MatchState::Unmatched));
        assert!(report.checks.iter().all(|c| c.nearest_value.is_none()));
        assert!(!report.passed);
    }

    #[test]
    fn no_claims_passes_vacuously() {
        let tools = results(&[("heart_rate", serde_json::json!(87))]);
        let report = validate_response("Keep up the good work!", &tools, 0.10);
        assert!(report.checks.is_empty());
        assert!(report.passed);
    }

    #[test]
    fn unit_hint_narrows_the_field_search() {
        // 60 bpm must bind to heart_rate (62), not sleep_hours (60.0), even
        // though the latter is numerically closer.
        let tools = results(&[
            ("heart_rate", serde_json::json!(62)),
            ("sleep_hours", serde_json::json!(60.0)),
        ]);
        let report = validate_response("Resting rate around 60 bpm", &tools, 0.10);
        assert_eq!(report.checks[0].nearest_field.as_deref(), Some("heart_rate"));
        assert_eq!(report.checks[0].state, MatchState::Fuzzy);
    }

    #[test]
    fn unitless_claim_searches_all_fields() {
        let tools = results(&[
            ("steps", serde_json::json!(9500)),
            ("calories", serde_json::json!(2200)),
        ]);
        let report = validate_response("You hit 9500 today", &tools, 0.10);
        assert_eq!(report.checks[0].nearest_field.as_deref(), Some("steps"));
        assert_eq!(report.checks[0].state, MatchState::Exact);
    }

    #[test]
    fn nested_tool_results_are_searched() {
        let tools = results(&[("sleep", serde_json::json!({"hours": 7.5, "score": 82}))]);
        let report = validate_response("You slept 7.5 hours with a score of 82", &tools, 0.10);
        assert_eq!(report.checks[0].nearest_field.as_deref(), Some("sleep.hours"));
        assert_eq!(report.checks[1].state, MatchState::Exact);
        assert!(report.passed);
    }

    #[test]
    fn unit_without_matching_field_falls_back_to_all_fields() {
        let tools = results(&[("distance_km", serde_json::json!(5.0))]);
        let report = validate_response("You covered 5 kg today", &tools, 0.10);
        // "kg" has no weight-like field here; the full set still confirms 5.
        assert_eq!(report.checks[0].state, MatchState::Exact);
    }

    #[test]
    fn report_counts_by_state() {
        let tools = results(&[("heart_rate", serde_json::json!(87))]);
        let report = validate_response("87 bpm now, down from 130 bpm earlier", &tools, 0.10);
        assert_eq!(report.count(MatchState::Exact), 1);
        assert_eq!(report.count(MatchState::Unmatched), 1);
        assert!(!report.passed);
    }
}
