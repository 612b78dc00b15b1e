//! [`FactExtractor`] – the fact-distillation seam.
//!
//! Turning a slice of conversation into standalone fact strings is an
//! external summarisation concern (usually another model call). The
//! coordinator only depends on this trait; whatever implements it decides
//! what is worth remembering.

use async_trait::async_trait;
use engram_types::{EngramError, Turn};

/// Produces candidate fact strings from a slice of conversation turns.
#[async_trait]
pub trait FactExtractor: Send + Sync {
    /// Return zero or more standalone fact texts worth persisting, e.g.
    /// `"User is training for a half marathon in October"`.
    ///
    /// An error here skips fact extraction for this cycle; the same turns can
    /// be retried on the next one.
    async fn extract(&self, turns: &[Turn]) -> Result<Vec<String>, EngramError>;
}
