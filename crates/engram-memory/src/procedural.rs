//! Procedural memory – per-user goals and preferences.
//!
//! A small structured record keyed by `(user_id, key)`. Writes resolve by
//! timestamp comparison rather than arrival order, so a stale concurrent
//! write never overwrites a newer one. Goals are never auto-expired.
//!
//! # Storage layout
//!
//! | column     | type | description                                  |
//! |------------|------|----------------------------------------------|
//! | user_id    | TEXT | Owning user (part of the primary key)        |
//! | key        | TEXT | Goal key, unique per user                    |
//! | value      | TEXT | Goal value                                   |
//! | updated_at | TEXT | Fixed-width RFC-3339 timestamp (UTC)         |
//!
//! `updated_at` is stored with microsecond precision and a `Z` suffix so that
//! SQL string comparison orders chronologically.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use engram_types::{EngramError, Goal};
use rusqlite::{Connection, params};
use tracing::warn;

/// SQLite-backed per-user goal store with last-write-wins semantics.
#[derive(Clone)]
pub struct ProceduralStore {
    conn: Arc<Mutex<Connection>>,
}

impl ProceduralStore {
    /// Open (or create) a persistent store at `path`.
    pub fn open(path: &str) -> Result<Self, EngramError> {
        let conn = Connection::open(path).map_err(read_err)?;
        Self::from_connection(conn)
    }

    /// Open a temporary in-memory store (useful for testing).
    pub fn open_in_memory() -> Result<Self, EngramError> {
        let conn = Connection::open_in_memory().map_err(read_err)?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, EngramError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), EngramError> {
        self.conn()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS goals (
                    user_id    TEXT NOT NULL,
                    key        TEXT NOT NULL,
                    value      TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    PRIMARY KEY (user_id, key)
                );",
            )
            .map_err(read_err)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or update a goal. The write only lands when `goal.updated_at`
    /// is at least as recent as the stored row's timestamp, so a stale
    /// concurrent writer loses to a newer one regardless of arrival order.
    pub fn set_goal(&self, goal: &Goal) -> Result<(), EngramError> {
        self.conn()
            .execute(
                "INSERT INTO goals (user_id, key, value, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id, key) DO UPDATE
                 SET value = excluded.value, updated_at = excluded.updated_at
                 WHERE excluded.updated_at >= goals.updated_at",
                params![
                    goal.user_id,
                    goal.key,
                    goal.value,
                    goal.updated_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                ],
            )
            .map_err(write_err)?;
        Ok(())
    }

    /// Return all goals for `user_id` as a key-unique mapping.
    pub fn get_goals(&self, user_id: &str) -> Result<HashMap<String, Goal>, EngramError> {
        let conn = self.conn();
        let mut stmt = conn
            .prepare("SELECT key, value, updated_at FROM goals WHERE user_id = ?1")
            .map_err(read_err)?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                let key: String = row.get(0)?;
                let value: String = row.get(1)?;
                let updated_at: String = row.get(2)?;
                Ok((key, value, updated_at))
            })
            .map_err(read_err)?;

        let mut goals = HashMap::new();
        for row in rows {
            let (key, value, updated_at) = row.map_err(read_err)?;
            match updated_at.parse::<DateTime<Utc>>() {
                Ok(updated_at) => {
                    goals.insert(
                        key.clone(),
                        Goal {
                            user_id: user_id.to_string(),
                            key,
                            value,
                            updated_at,
                        },
                    );
                }
                Err(_) => warn!(user_id, key = %key, "skipping goal with malformed timestamp"),
            }
        }
        Ok(goals)
    }

    /// Number of goals currently stored for `user_id`.
    pub fn goal_count(&self, user_id: &str) -> Result<usize, EngramError> {
        self.conn()
            .query_row(
                "SELECT COUNT(*) FROM goals WHERE user_id = ?1",
                params![user_id],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as usize)
            .map_err(read_err)
    }
}

fn read_err(e: rusqlite::Error) -> EngramError {
    EngramError::StoreUnavailable(e.to_string())
}

fn write_err(e: rusqlite::Error) -> EngramError {
    EngramError::WriteFailed {
        store: "procedural".to_string(),
        details: e.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
