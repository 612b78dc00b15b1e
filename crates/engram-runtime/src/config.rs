//! Runtime configuration.
//!
//! All domain-tuning parameters (dedup threshold, similarity floor, numeric
//! tolerance, history bound, TTL) are configuration, never hard-coded at call
//! sites. A config is validated once at startup; an invalid value fails fast
//! before any traffic is served.

use std::fs;
use std::path::Path;

use engram_types::EngramError;
use engram_validator::CorrectionPolicy;
use serde::{Deserialize, Serialize};

/// Persisted runtime configuration, loadable from a TOML file with `ENGRAM_*`
/// environment overrides applied on top.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngramConfig {
    /// Path of the SQLite database file. `None` keeps everything in memory
    /// (data lost on exit).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_path: Option<String>,

    /// Cosine similarity above which two facts are duplicates.
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f32,

    /// Similarity floor for semantic retrieval.
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,

    /// Maximum semantic hits returned per retrieval.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// FIFO bound on turns kept per session.
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,

    /// Sliding session expiry, refreshed on every append.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: i64,

    /// Relative tolerance for a fuzzy numeric match.
    #[serde(default = "default_numeric_tolerance")]
    pub numeric_tolerance: f64,

    /// Budget for one embedding call before retrieval degrades.
    #[serde(default = "default_embed_timeout_ms")]
    pub embed_timeout_ms: u64,

    /// Expected embedding vector dimension.
    #[serde(default = "default_embedding_dim")]
    pub embedding_dim: usize,

    /// Base URL of the embedding server.
    #[serde(default = "default_embedding_url")]
    pub embedding_url: String,

    /// Embedding model name.
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// How unmatched numeric claims are rewritten.
    #[serde(default)]
    pub correction_policy: CorrectionPolicy,
}

fn default_dedup_threshold() -> f32 {
    0.95
}
fn default_min_similarity() -> f32 {
    0.8
}
fn default_top_k() -> usize {
    5
}
fn default_max_history_turns() -> usize {
    20
}
fn default_session_ttl_secs() -> i64 {
    3600
}
fn default_numeric_tolerance() -> f64 {
    0.10
}
fn default_embed_timeout_ms() -> u64 {
    2000
}
fn default_embedding_dim() -> usize {
    768
}
fn default_embedding_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}

impl Default for EngramConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            dedup_threshold: default_dedup_threshold(),
            min_similarity: default_min_similarity(),
            top_k: default_top_k(),
            max_history_turns: default_max_history_turns(),
            session_ttl_secs: default_session_ttl_secs(),
            numeric_tolerance: default_numeric_tolerance(),
            embed_timeout_ms: default_embed_timeout_ms(),
            embedding_dim: default_embedding_dim(),
            embedding_url: default_embedding_url(),
            embedding_model: default_embedding_model(),
            correction_policy: CorrectionPolicy::default(),
        }
    }
}

impl EngramConfig {
    /// Check every tunable against its legal range.
    ///
    /// Called by the coordinator constructor; an error here is fatal at
    /// startup, never absorbed.
    pub fn validate(&self) -> Result<(), EngramError> {
        if !(self.dedup_threshold > 0.0 && self.dedup_threshold <= 1.0) {
            return Err(EngramError::Configuration(format!(
                "dedup_threshold {} outside (0, 1]",
                self.dedup_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.min_similarity) {
            return Err(EngramError::Configuration(format!(
                "min_similarity {} outside [0, 1]",
                self.min_similarity
            )));
        }
        if self.top_k == 0 {
            return Err(EngramError::Configuration("top_k must be at least 1".to_string()));
        }
        if self.max_history_turns == 0 {
            return Err(EngramError::Configuration(
                "max_history_turns must be at least 1".to_string(),
            ));
        }
        if self.session_ttl_secs <= 0 {
            return Err(EngramError::Configuration(
                "session_ttl_secs must be positive".to_string(),
            ));
        }
        if !(self.numeric_tolerance > 0.0 && self.numeric_tolerance < 1.0) {
            return Err(EngramError::Configuration(format!(
                "numeric_tolerance {} outside (0, 1)",
                self.numeric_tolerance
            )));
        }
        if self.embed_timeout_ms == 0 {
            return Err(EngramError::Configuration(
                "embed_timeout_ms must be positive".to_string(),
            ));
        }
        if self.embedding_dim == 0 {
            return Err(EngramError::Configuration(
                "embedding_dim must be at least 1".to_string(),
            ));
        }
        if self.embedding_url.is_empty() || self.embedding_model.is_empty() {
            return Err(EngramError::Configuration(
                "embedding_url and embedding_model must be set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load a config from `path`. Returns `None` if the file does not exist.
/// Environment overrides are applied to a loaded config.
pub fn load_from(path: &Path) -> Result<Option<EngramConfig>, EngramError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| {
        EngramError::Configuration(format!("failed to read config at {}: {e}", path.display()))
    })?;
    let mut cfg: EngramConfig = toml::from_str(&raw)
        .map_err(|e| EngramError::Configuration(format!("failed to parse config: {e}")))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Save `cfg` to `path`, creating parent directories as needed.
pub fn save_to(cfg: &EngramConfig, path: &Path) -> Result<(), EngramError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            EngramError::Configuration(format!("failed to create config directory: {e}"))
        })?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| EngramError::Configuration(format!("failed to serialize config: {e}")))?;
    fs::write(path, raw).map_err(|e| {
        EngramError::Configuration(format!("failed to write config at {}: {e}", path.display()))
    })
}

/// Apply `ENGRAM_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `ENGRAM_EMBEDDING_URL` | `embedding_url` |
/// | `ENGRAM_EMBEDDING_MODEL` | `embedding_model` |
/// | `ENGRAM_DB_PATH` | `db_path` |
pub fn apply_env_overrides(cfg: &mut EngramConfig) {
    if let Ok(v) = std::env::var("ENGRAM_EMBEDDING_URL") {
        cfg.embedding_url = v;
    }
    if let Ok(v) = std::env::var("ENGRAM_EMBEDDING_MODEL") {
        cfg.embedding_model = v;
    }
    if let Ok(v) = std::env::var("ENGRAM_DB_PATH") {
        cfg.db_path = Some(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        EngramConfig::default().validate().unwrap();
    }

    #[test]
    fn dedup_threshold_out_of_range_is_rejected() {
        let mut cfg = EngramConfig::default();
        cfg.dedup_threshold = 0.0;
        assert!(matches!(cfg.validate(), Err(EngramError::Configuration(_))));
        cfg.dedup_threshold = 1.5;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn numeric_tolerance_bounds_are_exclusive() {
        let mut cfg = EngramConfig::default();
        cfg.numeric_tolerance = 0.0;
        assert!(cfg.validate().is_err());
        cfg.numeric_tolerance = 1.0;
        assert!(cfg.validate().is_err());
        cfg.numeric_tolerance = 0.25;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn zero_history_bound_is_rejected() {
        let mut cfg = EngramConfig::default();
        cfg.max_history_turns = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_embedding_dim_is_rejected() {
        let mut cfg = EngramConfig::default();
        cfg.embedding_dim = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn roundtrip_default_config() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("engram.toml");

        let cfg = EngramConfig::default();
        save_to(&cfg, &path).expect("save");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.top_k, 5);
        assert_eq!(loaded.max_history_turns, 20);
        assert!((loaded.dedup_threshold - 0.95).abs() < 1e-6);
        assert_eq!(loaded.correction_policy, CorrectionPolicy::Substitute);
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let result = load_from(&dir.path().join("missing.toml")).expect("no error");
        assert!(result.is_none());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("engram.toml");
        fs::write(&path, "top_k = 3\n").unwrap();

        let loaded = load_from(&path).unwrap().unwrap();
        assert_eq!(loaded.top_k, 3);
        assert_eq!(loaded.max_history_turns, 20);
    }

    #[test]
    fn malformed_toml_is_a_configuration_error() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("engram.toml");
        fs::write(&path, "top_k = \"not a number\"").unwrap();
        assert!(matches!(load_from(&path), Err(EngramError::Configuration(_))));
    }

    #[test]
    fn apply_env_overrides_changes_embedding_url() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("ENGRAM_EMBEDDING_URL", "http://embed-host:11434") };
        let mut cfg = EngramConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.embedding_url, "http://embed-host:11434");
        unsafe { std::env::remove_var("ENGRAM_EMBEDDING_URL") };
    }

    #[test]
    fn apply_env_overrides_sets_db_path() {
        // SAFETY: single-threaded test; no data races on env vars.
        unsafe { std::env::set_var("ENGRAM_DB_PATH", "/tmp/engram.db") };
        let mut cfg = EngramConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.db_path.as_deref(), Some("/tmp/engram.db"));
        unsafe { std::env::remove_var("ENGRAM_DB_PATH") };
    }
}
