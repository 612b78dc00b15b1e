use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// The role of a participant in a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// A single conversation turn. Immutable once appended to a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Structured output of the domain tools invoked while producing this
    /// turn, if any. This is the ground truth the numeric validator checks
    /// generated claims against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_results: Option<ToolResults>,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Construct a turn stamped with the current UTC time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_results: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_tool_results(mut self, results: ToolResults) -> Self {
        self.tool_results = Some(results);
        self
    }
}

/// Flat or shallow-nested mapping of tool output fields to values, e.g.
/// `{"heart_rate": 87, "sleep": {"hours": 7.5}}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolResults(pub BTreeMap<String, serde_json::Value>);

impl ToolResults {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Flatten the mapping into `(field_path, numeric_value)` pairs, descending
    /// one level into nested objects using dotted paths. Non-numeric leaves are
    /// ignored.
    pub fn numeric_fields(&self) -> Vec<(String, f64)> {
        let mut out = Vec::new();
        for (key, value) in &self.0 {
            match value {
                serde_json::Value::Number(n) => {
                    if let Some(v) = n.as_f64() {
                        out.push((key.clone(), v));
                    }
                }
                serde_json::Value::Object(inner) => {
                    for (inner_key, inner_value) in inner {
                        if let Some(v) = inner_value.as_f64() {
                            out.push((format!("{key}.{inner_key}"), v));
                        }
                    }
                }
                _ => {}
            }
        }
        out
    }
}

impl FromIterator<(String, serde_json::Value)> for ToolResults {
    fn from_iter<I: IntoIterator<Item = (String, serde_json::Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// A long-term fact stored in the semantic index. Never mutated after
/// creation; near-duplicates are discarded at insert time and a user's facts
/// are only ever deleted wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fact {
    pub id: Uuid,
    pub user_id: String,
    pub text: String,
    /// Dense embedding vector; fixed dimension across one index.
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    /// Free-form annotations; ordering is irrelevant.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Fact {
    /// Construct a fact with a fresh UUID and the current UTC timestamp.
    pub fn new(user_id: impl Into<String>, text: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            text: text.into(),
            embedding,
            created_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }
}

/// A per-user goal or preference record. Unique per `(user_id, key)`;
/// concurrent writes resolve by timestamp, most recent wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub user_id: String,
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// Closed set of domain tools the agent loop may dispatch. Each variant
/// carries an explicit input schema (via `schemars`) so the dispatcher can
/// validate arguments before invocation; the memory core itself only ever
/// consumes the resulting [`ToolResults`].
#[derive(Debug, Clone, Serialize, Deserialize, schemars::JsonSchema)]
#[serde(tag = "tool", content = "input")]
pub enum ToolRequest {
    /// Latest reading of a single vital-sign metric (e.g. `"heart_rate"`).
    VitalsLookup { metric: String, window_hours: u32 },
    /// Aggregated activity figures (steps, distance, calories) for one day.
    ActivitySummary { day: String },
    /// Macro/calorie breakdown for a logged meal.
    NutritionLookup { meal: String },
    /// Sleep duration and quality score over the last `nights` nights.
    SleepSummary { nights: u32 },
}

/// Error taxonomy for the memory core.
///
/// Transient store and embedding failures are absorbed into degraded-mode
/// reads by the coordinator; only write failures and configuration errors
/// surface as hard failures.
#[derive(Error, Debug)]
pub enum EngramError {
    /// The underlying store is unreachable.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// A write ran to completion but failed; surfaced to the agent loop.
    #[error("write to {store} failed: {details}")]
    WriteFailed { store: String, details: String },

    /// The embedding function failed or timed out; retrieval degrades.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    /// A single malformed stored record; skipped during batch reads.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),

    /// Invalid thresholds, dimension mismatch, or missing collaborator at
    /// startup. Fatal before serving traffic.
    #[error("configuration error: {0}")]
    Configuration(String),
}
