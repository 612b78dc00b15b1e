//! Episodic memory – the per-session conversation log.
//!
//! Append-only, strictly time-ordered turn storage with a configurable FIFO
//! length bound and a sliding TTL. Every append refreshes the session's
//! expiry; an expired or unknown session reads back as empty (a normal
//! cold-start case, not an error).
//!
//! # Storage layout
//!
//! | table    | column       | type    | description                            |
//! |----------|--------------|---------|----------------------------------------|
//! | sessions | id           | TEXT    | Session identifier (primary key)       |
//! | sessions | expires_at   | TEXT    | RFC-3339 expiry time (UTC)             |
//! | turns    | session_id   | TEXT    | Owning session                         |
//! | turns    | seq          | INTEGER | Monotonic position within the session  |
//! | turns    | role         | TEXT    | `user` / `assistant` / `tool`          |
//! | turns    | content      | TEXT    | Turn text                              |
//! | turns    | tool_results | TEXT    | JSON tool output (NULL when absent)    |
//! | turns    | timestamp    | TEXT    | RFC-3339 creation time (UTC)           |
//!
//! # Example
//!
//! ```rust
//! use engram_memory::episodic::EpisodicStore;
//! use engram_types::{Role, Turn};
//!
//! let store = EpisodicStore::open_in_memory(20, 3600).unwrap();
//! store.append("session-1", &Turn::new(Role::User, "hello")).unwrap();
//!
//! let turns = store.history("session-1", 10).unwrap();
//! assert_eq!(turns.len(), 1);
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Duration, Utc};
use engram_types::{EngramError, Role, Turn};
use rusqlite::{Connection, params};
use tracing::{debug, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Role serialisation helpers
// ─────────────────────────────────────────────────────────────────────────────

fn role_as_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn role_from_str(s: &str) -> Option<Role> {
    match s {
        "user" => Some(Role::User),
        "assistant" => Some(Role::Assistant),
        "tool" => Some(Role::Tool),
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// EpisodicStore
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed per-session turn log.
///
/// Cloneable; clones share the same underlying connection.
#[derive(Clone)]
pub struct EpisodicStore {
    conn: Arc<Mutex<Connection>>,
    max_turns: usize,
    ttl: Duration,
}

impl EpisodicStore {
    /// Open (or create) a persistent store at `path`, keeping at most
    /// `max_turns` turns per session with a sliding `ttl_secs` expiry.
    pub fn open(path: &str, max_turns: usize, ttl_secs: i64) -> Result<Self, EngramError> {
        let conn = Connection::open(path).map_err(read_err)?;
        Self::from_connection(conn, max_turns, ttl_secs)
    }

    /// Open a temporary in-memory store (useful for testing).
    pub fn open_in_memory(max_turns: usize, ttl_secs: i64) -> Result<Self, EngramError> {
        let conn = Connection::open_in_memory().map_err(read_err)?;
        Self::from_connection(conn, max_turns, ttl_secs)
    }

    fn from_connection(conn: Connection, max_turns: usize, ttl_secs: i64) -> Result<Self, EngramError> {
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            max_turns: max_turns.max(1),
            ttl: Duration::seconds(ttl_secs.max(1)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), EngramError> {
        self.conn()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS sessions (
                    id         TEXT NOT NULL PRIMARY KEY,
                    expires_at TEXT NOT NULL
                );
                CREATE TABLE IF NOT EXISTS turns (
                    session_id   TEXT NOT NULL,
                    seq          INTEGER NOT NULL,
                    role         TEXT NOT NULL,
                    content      TEXT NOT NULL,
                    tool_results TEXT,
                    timestamp    TEXT NOT NULL,
                    PRIMARY KEY (session_id, seq)
                );",
            )
            .map_err(read_err)
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `turn` to the session, creating the session on first use and
    /// refreshing its expiry. Oldest turns past the length bound are trimmed
    /// FIFO; trimming itself never fails the call.
    pub fn append(&self, session_id: &str, turn: &Turn) -> Result<(), EngramError> {
        let conn = self.conn();
        purge_if_expired(&conn, session_id)?;

        let expires_at = (Utc::now() + self.ttl).to_rfc3339();
        conn.execute(
            "INSERT INTO sessions (id, expires_at) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET expires_at = excluded.expires_at",
            params![session_id, expires_at],
        )
        .map_err(write_err)?;

        let next_seq: i64 = conn
            .query_row(
                "SELECT COALESCE(MAX(seq), -1) + 1 FROM turns WHERE session_id = ?1",
                params![session_id],
                |row| row.get(0),
            )
            .map_err(write_err)?;

        let tool_results = match &turn.tool_results {
            Some(results) => Some(
                serde_json::to_string(results)
                    .map_err(|e| EngramError::CorruptRecord(e.to_string()))?,
            ),
            None => None,
        };
        conn.execute(
            "INSERT INTO turns (session_id, seq, role, content, tool_results, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                session_id,
                next_seq,
                role_as_str(turn.role),
                turn.content,
                tool_results,
                turn.timestamp.to_rfc3339(),
            ],
        )
        .map_err(write_err)?;

        // FIFO trim: keep only the most recent `max_turns` sequence numbers.
        let trimmed = conn
            .execute(
                "DELETE FROM turns WHERE session_id = ?1 AND seq <= ?2",
                params![session_id, next_seq - self.max_turns as i64],
            )
            .unwrap_or(0);
        if trimmed > 0 {
            debug!(session_id, trimmed, "evicted oldest turns past history bound");
        }
        Ok(())
    }

    /// Return the most recent `limit` turns in chronological order.
    ///
    /// An unknown or expired session yields an empty vec. Malformed rows are
    /// skipped with a warning and never abort the read.
    pub fn history(&self, session_id: &str, limit: usize) -> Result<Vec<Turn>, EngramError> {
        let conn = self.conn();
        if !purge_if_expired(&conn, session_id)? {
            return Ok(Vec::new());
        }

        let mut stmt = conn
            .prepare(
                "SELECT role, content, tool_results, timestamp
                 FROM turns WHERE session_id = ?1
                 ORDER BY seq DESC LIMIT ?2",
            )
            .map_err(read_err)?;
        let rows = stmt
            .query_map(params![session_id, limit as i64], |row| {
                let role: String = row.get(0)?;
                let content: String = row.get(1)?;
                let tool_results: Option<String> = row.get(2)?;
                let timestamp: String = row.get(3)?;
                Ok((role, content, tool_results, timestamp))
            })
            .map_err(read_err)?;

        let mut turns = Vec::new();
        for row in rows {
            let (role, content, tool_results, timestamp) = row.map_err(read_err)?;
            match parse_turn(&role, content, tool_results.as_deref(), &timestamp) {
                Some(turn) => turns.push(turn),
                None => warn!(session_id, "skipping malformed turn row"),
            }
        }
        turns.reverse();
        Ok(turns)
    }

    /// Number of turns currently held for `session_id` (0 if expired/unknown).
    pub fn turn_count(&self, session_id: &str) -> Result<usize, EngramError> {
        let conn = self.conn();
        if !purge_if_expired(&conn, session_id)? {
            return Ok(0);
        }
        conn.query_row(
            "SELECT COUNT(*) FROM turns WHERE session_id = ?1",
            params![session_id],
            |row| row.get::<_, i64>(0),
        )
        .map(|n| n as usize)
        .map_err(read_err)
    }

    /// Delete the session and all of its turns. Idempotent.
    pub fn clear(&self, session_id: &str) -> Result<(), EngramError> {
        let conn = self.conn();
        conn.execute("DELETE FROM turns WHERE session_id = ?1", params![session_id])
            .map_err(write_err)?;
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])
            .map_err(write_err)?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Row helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Returns `true` if the session exists and is live. An expired session is
/// deleted on sight so it becomes indistinguishable from a cold start.
fn purge_if_expired(conn: &Connection, session_id: &str) -> Result<bool, EngramError> {
    let expires_at: Option<String> = conn
        .query_row(
            "SELECT expires_at FROM sessions WHERE id = ?1",
            params![session_id],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(read_err(other)),
        })?;

    let Some(expires_at) = expires_at else {
        return Ok(false);
    };
    let live = expires_at
        .parse::<DateTime<Utc>>()
        .map(|t| t > Utc::now())
        .unwrap_or(false);
    if !live {
        debug!(session_id, "purging expired session");
        conn.execute("DELETE FROM turns WHERE session_id = ?1", params![session_id])
            .map_err(read_err)?;
        conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])
            .map_err(read_err)?;
    }
    Ok(live)
}

fn parse_turn(
    role: &str,
    content: String,
    tool_results: Option<&str>,
    timestamp: &str,
) -> Option<Turn> {
    let role = role_from_str(role)?;
    let timestamp = timestamp.parse::<DateTime<Utc>>().ok()?;
    let tool_results = match tool_results {
        Some(raw) => Some(serde_json::from_str(raw).ok()?),
        None => None,
    };
    Some(Turn {
        role,
        content,
        tool_results,
        timestamp,
    })
}

fn read_err(e: rusqlite::Error) -> EngramError {
    EngramError::StoreUnavailable(e.to_string())
}

fn write_err(e: rusqlite::Error) -> EngramError {
    EngramError::WriteFailed {
        store: "episodic".to_string(),
        details: e.to_string(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
