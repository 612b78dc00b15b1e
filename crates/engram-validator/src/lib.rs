//! `engram-validator` – Numeric Grounding
//!
//! Cross-checks numeric claims in generated text against the tool output
//! that produced the answer. It never invents a number: a claim is either
//! confirmed by the ground truth, flagged, or substituted with a value that
//! actually appears in the tool results.
//!
//! # Modules
//!
//! - [`claims`] – [`extract_claims`][claims::extract_claims]: lazy extraction
//!   of `(value, unit, context)` triples from free text, with a fixed
//!   vocabulary of domain units.
//! - [`checker`] – [`validate_response`][checker::validate_response]: matches
//!   every extracted claim against the flattened tool results within a
//!   relative tolerance and classifies it as exact, fuzzy, or unmatched.
//! - [`correction`] – [`correct`][correction::correct]: rewrites unmatched
//!   claims, either substituting the nearest tool-sourced value or wrapping
//!   the claim with an uncertainty marker.

pub mod checker;
pub mod claims;
pub mod correction;

pub use checker::{ClaimCheck, MatchState, ValidationReport, validate_response};
pub use claims::{ClaimExtractor, NumericClaim, Unit, extract_claims};
pub use correction::{CorrectionPolicy, correct};
