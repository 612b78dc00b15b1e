//! Semantic memory – the per-user embedded fact index.
//!
//! Stores [`Fact`] records together with their dense embedding vectors and
//! answers cosine-similarity queries over one user's facts. Insertion is
//! idempotent with respect to near-duplicates: a new fact whose embedding is
//! closer than the dedup threshold to an existing fact of the same user is
//! discarded, keeping the first writer. This prevents the same fact,
//! rephrased slightly, from accumulating and polluting retrieval ranking.
//!
//! # Storage layout
//!
//! | column     | type | description                            |
//! |------------|------|----------------------------------------|
//! | id         | TEXT | UUID v4 primary key                    |
//! | user_id    | TEXT | Owning user                            |
//! | text       | TEXT | Fact text                              |
//! | embedding  | BLOB | Little-endian f32 vector (4 × N bytes) |
//! | created_at | TEXT | RFC-3339 creation time (UTC)           |
//! | metadata   | TEXT | JSON string map                        |
//!
//! # Example
//!
//! ```rust
//! use engram_memory::semantic::SemanticIndex;
//! use engram_types::Fact;
//!
//! let index = SemanticIndex::open_in_memory(0.95).unwrap();
//! let id = index.upsert(&Fact::new("user-1", "runs at 6am", vec![1.0, 0.0])).unwrap();
//!
//! // A near-identical embedding dedups to the first fact.
//! let again = index.upsert(&Fact::new("user-1", "runs early", vec![1.0, 0.001])).unwrap();
//! assert_eq!(id, again);
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use engram_types::{EngramError, Fact};
use rusqlite::{Connection, params};
use tracing::{debug, warn};
use uuid::Uuid;

// ─────────────────────────────────────────────────────────────────────────────
// Cosine similarity
// ─────────────────────────────────────────────────────────────────────────────

/// Compute the cosine similarity between two equal-length vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` if either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Embedding serialisation helpers
// ─────────────────────────────────────────────────────────────────────────────

fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// SemanticIndex
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed fact index with per-user similarity retrieval.
///
/// The dedup check-then-insert in [`upsert`][Self::upsert] runs while holding
/// the connection guard, so two near-simultaneous inserts of near-duplicate
/// facts for the same user cannot both land.
#[derive(Clone)]
pub struct SemanticIndex {
    conn: Arc<Mutex<Connection>>,
    dedup_threshold: f32,
}

impl SemanticIndex {
    /// Open (or create) a persistent index at `path`.
    ///
    /// `dedup_threshold` is the cosine similarity above which two facts are
    /// treated as duplicates; it is clamped to `(0, 1]`.
    pub fn open(path: &str, dedup_threshold: f32) -> Result<Self, EngramError> {
        let conn = Connection::open(path).map_err(read_err)?;
        Self::from_connection(conn, dedup_threshold)
    }

    /// Open a temporary in-memory index (useful for testing).
    pub fn open_in_memory(dedup_threshold: f32) -> Result<Self, EngramError> {
        let conn = Connection::open_in_memory().map_err(read_err)?;
        Self::from_connection(conn, dedup_threshold)
    }

    fn from_connection(conn: Connection, dedup_threshold: f32) -> Result<Self, EngramError> {
        let index = Self {
            conn: Arc::new(Mutex::new(conn)),
            dedup_threshold: dedup_threshold.clamp(f32::EPSILON, 1.0),
        };
        index.init_schema()?;
        Ok(index)
    }

    fn init_schema(&self) -> Result<(), EngramError> {
        self.conn()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS facts (
                    id         TEXT NOT NULL PRIMARY KEY,
                    user_id    TEXT NOT NULL,
                    text       TEXT NOT NULL,
                    embedding  BLOB NOT NULL,
                    created_at TEXT NOT NULL,
                    metadata   TEXT NOT NULL DEFAULT '{}'
                );
                CREATE INDEX IF NOT EXISTS idx_facts_user ON facts(user_id);",
            )
            .map_err(read_err)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert `fact` unless a near-duplicate already exists for the same user.
    ///
    /// Returns the id of the retained fact: the existing one when the new
    /// embedding's cosine similarity to it exceeds the dedup threshold (first
    /// writer kept), otherwise the new fact's id.
    pub fn upsert(&self, fact: &Fact) -> Result<Uuid, EngramError> {
        if fact.embedding.is_empty() {
            return Err(EngramError::CorruptRecord("empty fact embedding".to_string()));
        }

        // Scan and insert under one guard so the check-then-insert is atomic
        // per index.
        let conn = self.conn();
        for stored in load_user_facts(&conn, &fact.user_id)? {
            if stored.embedding.len() != fact.embedding.len() {
                continue;
            }
            let similarity = cosine_similarity(&stored.embedding, &fact.embedding);
            if similarity > self.dedup_threshold {
                debug!(
                    user_id = %fact.user_id,
                    existing = %stored.id,
                    similarity,
                    "near-duplicate fact discarded"
                );
                return Ok(stored.id);
            }
        }

        let metadata = serde_json::to_string(&fact.metadata)
            .map_err(|e| EngramError::CorruptRecord(e.to_string()))?;
        conn.execute(
            "INSERT INTO facts (id, user_id, text, embedding, created_at, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                fact.id.to_string(),
                fact.user_id,
                fact.text,
                embedding_to_bytes(&fact.embedding),
                fact.created_at.to_rfc3339(),
                metadata,
            ],
        )
        .map_err(write_err)?;
        Ok(fact.id)
    }

    /// Return up to `top_k` facts for `user_id` ranked by descending cosine
    /// similarity to `embedding`, filtered to similarity ≥ `min_similarity`.
    /// Ties break toward the more recently created fact. An empty result is
    /// normal, not an error.
    pub fn query(
        &self,
        user_id: &str,
        embedding: &[f32],
        top_k: usize,
        min_similarity: f32,
    ) -> Result<Vec<(Fact, f32)>, EngramError> {
        if embedding.is_empty() {
            warn!(user_id, "semantic query with empty embedding; returning no hits");
            return Ok(Vec::new());
        }

        let conn = self.conn();
        let mut scored: Vec<(Fact, f32)> = load_user_facts(&conn, user_id)?
            .into_iter()
            .filter_map(|fact| {
                if fact.embedding.len() != embedding.len() {
                    warn!(user_id, fact_id = %fact.id, "skipping fact with mismatched embedding dimension");
                    return None;
                }
                let score = cosine_similarity(&fact.embedding, embedding);
                (score >= min_similarity).then_some((fact, score))
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.total_cmp(&a.1)
                .then_with(|| b.0.created_at.cmp(&a.0.created_at))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    /// Delete every fact belonging to `user_id`. Idempotent; used when the
    /// upstream ground-truth data is reloaded to prevent stale recall.
    pub fn clear(&self, user_id: &str) -> Result<(), EngramError> {
        self.conn()
            .execute("DELETE FROM facts WHERE user_id = ?1", params![user_id])
            .map_err(write_err)?;
        Ok(())
    }

    /// Number of facts currently stored for `user_id`.
    pub fn fact_count(&self, user_id: &str) -> Result<usize, EngramError> {
        self.conn()
            .query_row(
                "SELECT COUNT(*) FROM facts WHERE user_id = ?1",
                params![user_id],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as usize)
            .map_err(read_err)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row helpers
// ─────────────────────────────────────────────────────────────────────────────

fn load_user_facts(conn: &Connection, user_id: &str) -> Result<Vec<Fact>, EngramError> {
    let mut stmt = conn
        .prepare(
            "SELECT id, text, embedding, created_at, metadata
             FROM facts WHERE user_id = ?1",
        )
        .map_err(read_err)?;
    let rows = stmt
        .query_map(params![user_id], |row| {
            let id: String = row.get(0)?;
            let text: String = row.get(1)?;
            let blob: Vec<u8> = row.get(2)?;
            let created_at: String = row.get(3)?;
            let metadata: String = row.get(4)?;
            Ok((id, text, blob, created_at, metadata))
        })
        .map_err(read_err)?;

    let mut facts = Vec::new();
    for row in rows {
        let (id, text, blob, created_at, metadata) = row.map_err(read_err)?;
        match parse_fact(user_id, &id, text, &blob, &created_at, &metadata) {
            Some(fact) => facts.push(fact),
            None => warn!(user_id, fact_id = %id, "skipping malformed fact row"),
        }
    }
    Ok(facts)
}

fn parse_fact(
    user_id: &str,
    id: &str,
    text: String,
    blob: &[u8],
    created_at: &str,
    metadata: &str,
) -> Option<Fact> {
    let id = Uuid::parse_str(id).ok()?;
    let created_at = created_at.parse::<DateTime<Utc>>().ok()?;
    let metadata: BTreeMap<String, String> = serde_json::from_str(metadata).ok()?;
    Some(Fact {
        id,
        user_id: user_id.to_string(),
        text,
        embedding: bytes_to_embedding(blob),
        created_at,
        metadata,
    })
}

fn read_err(e: rusqlite::Error) -> EngramError {
    EngramError::StoreUnavailable(e.to_string())
}

fn write_err(e: rusqlite::Error) -> EngramError {
    EngramError::WriteFailed {
        store: "semantic".to_string(),
        details: e.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
