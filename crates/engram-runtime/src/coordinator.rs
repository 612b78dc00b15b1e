//! [`MemoryCoordinator`] – the unified memory read/write surface.
//!
//! One instance is constructed per process, with injected store and embedding
//! handles, and torn down at shutdown; there is no implicit module-level
//! state. Each conversation turn touches the coordinator at three points:
//!
//! 1. **Retrieve** – [`retrieve_context`][MemoryCoordinator::retrieve_context]
//!    bundles recent history, similarity-ranked facts, and goals for prompt
//!    construction.
//! 2. **Validate & persist** – [`complete_turn`][MemoryCoordinator::complete_turn]
//!    runs the numeric validation pass over the generated text, applies the
//!    configured correction policy, and appends the assistant turn.
//! 3. **Distill** – [`extract_and_store_facts`][MemoryCoordinator::extract_and_store_facts]
//!    turns a conversation slice into deduplicated long-term facts.
//!
//! Memory retrieval must never block or fail the conversation turn: embedding
//! calls are time-bounded, and any transient read failure degrades the bundle
//! to whatever could be fetched, flagged via `degraded`. Writes are never
//! cancelled once started; they run to completion or fail atomically and
//! surface the failure.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use engram_memory::episodic::EpisodicStore;
use engram_memory::procedural::ProceduralStore;
use engram_memory::semantic::SemanticIndex;
use engram_types::{EngramError, Fact, Goal, Role, ToolResults, Turn};
use engram_validator::{MatchState, ValidationReport, correct, validate_response};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::EngramConfig;
use crate::embedder::Embedder;
use crate::extraction::FactExtractor;

// ─────────────────────────────────────────────────────────────────────────────
// Bundles
// ─────────────────────────────────────────────────────────────────────────────

/// Everything the prompt builder needs for one turn.
#[derive(Debug, Clone, Default)]
pub struct ContextBundle {
    /// Most recent session turns, chronological.
    pub history: Vec<Turn>,
    /// Similarity-ranked facts with their scores, best first.
    pub semantic_hits: Vec<(Fact, f32)>,
    /// The user's goals, keyed by goal key.
    pub goals: HashMap<String, Goal>,
    /// `true` when any tier could not be fetched; the bundle still carries
    /// whatever was available.
    pub degraded: bool,
}

/// Per-session memory figures for the upward-facing stats endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemoryStats {
    pub history_turns: usize,
    pub fact_count: usize,
    pub goal_count: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// MemoryCoordinator
// ─────────────────────────────────────────────────────────────────────────────

/// Orchestrates the episodic, semantic, and procedural stores behind a single
/// context-retrieval and context-persistence API.
pub struct MemoryCoordinator {
    episodic: EpisodicStore,
    semantic: SemanticIndex,
    procedural: ProceduralStore,
    embedder: Arc<dyn Embedder>,
    config: EngramConfig,
    /// Per-session write locks so interleaved `persist_turn` calls cannot
    /// corrupt history ordering. Concurrent sessions proceed independently.
    session_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl std::fmt::Debug for MemoryCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl MemoryCoordinator {
    /// Construct the coordinator, opening all three stores.
    ///
    /// Fails fast with [`EngramError::Configuration`] on an invalid config or
    /// an embedder whose dimension disagrees with it, and with
    /// [`EngramError::StoreUnavailable`] when the database cannot be opened.
    pub fn new(config: EngramConfig, embedder: Arc<dyn Embedder>) -> Result<Self, EngramError> {
        config.validate()?;
        if embedder.dimension() != config.embedding_dim {
            return Err(EngramError::Configuration(format!(
                "embedder produces dimension {} but {} is configured",
                embedder.dimension(),
                config.embedding_dim
            )));
        }

        let (episodic, semantic, procedural) = match &config.db_path {
            Some(path) => {
                info!(path = %path, "opening persistent memory stores");
                (
                    EpisodicStore::open(path, config.max_history_turns, config.session_ttl_secs)?,
                    SemanticIndex::open(path, config.dedup_threshold)?,
                    ProceduralStore::open(path)?,
                )
            }
            None => {
                warn!("no db_path configured; using in-memory stores (data will be lost)");
                (
                    EpisodicStore::open_in_memory(config.max_history_turns, config.session_ttl_secs)?,
                    SemanticIndex::open_in_memory(config.dedup_threshold)?,
                    ProceduralStore::open_in_memory()?,
                )
            }
        };

        Ok(Self {
            episodic,
            semantic,
            procedural,
            embedder,
            config,
            session_locks: Mutex::new(HashMap::new()),
        })
    }

    // -------------------------------------------------------------------------
    // Store accessors (for the surrounding service layer and tests)
    // -------------------------------------------------------------------------

    pub fn episodic(&self) -> &EpisodicStore {
        &self.episodic
    }

    pub fn semantic(&self) -> &SemanticIndex {
        &self.semantic
    }

    pub fn procedural(&self) -> &ProceduralStore {
        &self.procedural
    }

    // -------------------------------------------------------------------------
    // Retrieval
    // -------------------------------------------------------------------------

    /// Assemble the context bundle for one turn.
    ///
    /// This call never fails: an embedding failure or timeout yields
    /// `degraded = true` with empty semantic hits, and a store read failure
    /// degrades that tier to its cold state. The turn can always proceed on
    /// at least history and goals.
    pub async fn retrieve_context(
        &self,
        session_id: &str,
        user_id: &str,
        query_text: &str,
    ) -> ContextBundle {
        let mut degraded = false;

        let history = self
            .episodic
            .history(session_id, self.config.max_history_turns)
            .unwrap_or_else(|e| {
                warn!(session_id, error = %e, "history fetch failed; continuing without it");
                degraded = true;
                Vec::new()
            });

        let semantic_hits = match self.embed_bounded(query_text).await {
            Ok(embedding) => self
                .semantic
                .query(user_id, &embedding, self.config.top_k, self.config.min_similarity)
                .unwrap_or_else(|e| {
                    warn!(user_id, error = %e, "semantic query failed; continuing without hits");
                    degraded = true;
                    Vec::new()
                }),
            Err(e) => {
                warn!(user_id, error = %e, "embedding unavailable; retrieval degraded");
                degraded = true;
                Vec::new()
            }
        };

        let goals = self.procedural.get_goals(user_id).unwrap_or_else(|e| {
            warn!(user_id, error = %e, "goal fetch failed; continuing without goals");
            degraded = true;
            HashMap::new()
        });

        debug!(
            session_id,
            history = history.len(),
            hits = semantic_hits.len(),
            goals = goals.len(),
            degraded,
            "assembled context bundle"
        );
        ContextBundle {
            history,
            semantic_hits,
            goals,
            degraded,
        }
    }

    // -------------------------------------------------------------------------
    // Persistence
    // -------------------------------------------------------------------------

    /// Append `turn` to the session log.
    ///
    /// Appends for the same session serialise on a per-session lock; write
    /// failures surface to the caller rather than being absorbed.
    pub async fn persist_turn(&self, session_id: &str, turn: &Turn) -> Result<(), EngramError> {
        let lock = self.session_lock(session_id).await;
        let _guard = lock.lock().await;
        self.episodic.append(session_id, turn)
    }

    /// Validate `response_text` against `tool_results`, correct it when the
    /// validation fails, and persist the resulting assistant turn.
    ///
    /// Returns the final (possibly corrected) text together with the full
    /// validation report.
    pub async fn complete_turn(
        &self,
        session_id: &str,
        response_text: &str,
        tool_results: &ToolResults,
    ) -> Result<(String, ValidationReport), EngramError> {
        let mut report =
            validate_response(response_text, tool_results, self.config.numeric_tolerance);
        let final_text = if report.passed {
            response_text.to_string()
        } else {
            info!(
                session_id,
                unmatched = report.count(MatchState::Unmatched),
                "response contains unsupported numeric claims; correcting"
            );
            correct(response_text, &mut report, self.config.correction_policy)
        };

        let turn = Turn::new(Role::Assistant, final_text.clone());
        self.persist_turn(session_id, &turn).await?;
        Ok((final_text, report))
    }

    /// Distill `turns` into long-term facts for `user_id`.
    ///
    /// Candidates come from the injected extractor; each is embedded and
    /// upserted into the semantic index. A failure on one candidate is logged
    /// and skipped without aborting the batch. Returns the number of
    /// candidates that reached the index.
    pub async fn extract_and_store_facts(
        &self,
        user_id: &str,
        turns: &[Turn],
        extractor: &dyn FactExtractor,
    ) -> usize {
        let candidates = match extractor.extract(turns).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(user_id, error = %e, "fact extraction skipped this cycle");
                return 0;
            }
        };

        let mut stored = 0;
        for candidate in candidates {
            let embedding = match self.embed_bounded(&candidate).await {
                Ok(embedding) => embedding,
                Err(e) => {
                    warn!(user_id, candidate = %candidate, error = %e, "skipping candidate: embedding failed");
                    continue;
                }
            };
            match self.semantic.upsert(&Fact::new(user_id, candidate.clone(), embedding)) {
                Ok(id) => {
                    debug!(user_id, fact_id = %id, "fact stored");
                    stored += 1;
                }
                Err(e) => {
                    warn!(user_id, candidate = %candidate, error = %e, "skipping candidate: upsert failed");
                }
            }
        }
        stored
    }

    // -------------------------------------------------------------------------
    // Upward-facing endpoints
    // -------------------------------------------------------------------------

    /// Memory figures for one session/user pair.
    pub fn session_stats(&self, session_id: &str, user_id: &str) -> Result<MemoryStats, EngramError> {
        Ok(MemoryStats {
            history_turns: self.episodic.turn_count(session_id)?,
            fact_count: self.semantic.fact_count(user_id)?,
            goal_count: self.procedural.goal_count(user_id)?,
        })
    }

    /// Drop a session's turns and its write lock. Idempotent.
    pub async fn clear_session(&self, session_id: &str) -> Result<(), EngramError> {
        self.episodic.clear(session_id)?;
        self.session_locks.lock().await.remove(session_id);
        Ok(())
    }

    /// Drop every fact for `user_id`; called when the upstream ground-truth
    /// data is reimported so stale recall cannot survive.
    pub fn clear_user_facts(&self, user_id: &str) -> Result<(), EngramError> {
        self.semantic.clear(user_id)
    }

    // -------------------------------------------------------------------------
    // Private helpers
    // -------------------------------------------------------------------------

    /// Embed with the configured time bound. A timeout cancels the in-flight
    /// call; nothing is written as a result of a cancelled read.
    async fn embed_bounded(&self, text: &str) -> Result<Vec<f32>, EngramError> {
        match tokio::time::timeout(
            Duration::from_millis(self.config.embed_timeout_ms),
            self.embedder.embed(text),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(EngramError::EmbeddingUnavailable(format!(
                "embedding timed out after {}ms",
                self.config.embed_timeout_ms
            ))),
        }
    }

    async fn session_lock(&self, session_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.session_locks.lock().await;
        locks
            .entry(session_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    const DIM: usize = 8;

    /// Deterministic embedder: identical text always maps to the same vector,
    /// different texts usually land far apart.
    struct HashEmbedder;

    #[async_trait]
    impl Embedder for HashEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EngramError> {
            let mut v = vec![0.0f32; DIM];
            for (i, b) in text.bytes().enumerate() {
                v[(b as usize + i) % DIM] += 1.0;
            }
            Ok(v)
        }

        fn dimension(&self) -> usize {
            DIM
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EngramError> {
            Err(EngramError::EmbeddingUnavailable("model offline".to_string()))
        }

        fn dimension(&self) -> usize {
            DIM
        }
    }

    struct SlowEmbedder;

    #[async_trait]
    impl Embedder for SlowEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EngramError> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(vec![1.0; DIM])
        }

        fn dimension(&self) -> usize {
            DIM
        }
    }

    struct StubExtractor(Vec<String>);

    #[async_trait]
    impl FactExtractor for StubExtractor {
        async fn extract(&self, _turns: &[Turn]) -> Result<Vec<String>, EngramError> {
            Ok(self.0.clone())
        }
    }

    struct FailingExtractor;

    #[async_trait]
    impl FactExtractor for FailingExtractor {
        async fn extract(&self, _turns: &[Turn]) -> Result<Vec<String>, EngramError> {
            Err(EngramError::EmbeddingUnavailable("summariser offline".to_string()))
        }
    }

    fn test_config() -> EngramConfig {
        EngramConfig {
            embedding_dim: DIM,
            embed_timeout_ms: 100,
            ..EngramConfig::default()
        }
    }

    fn coordinator() -> MemoryCoordinator {
        MemoryCoordinator::new(test_config(), Arc::new(HashEmbedder)).unwrap()
    }

    // ── construction ─────────────────────────────────────────────────────────

    #[test]
    fn invalid_config_fails_fast() {
        let mut cfg = test_config();
        cfg.dedup_threshold = 2.0;
        let err = MemoryCoordinator::new(cfg, Arc::new(HashEmbedder)).unwrap_err();
        assert!(matches!(err, EngramError::Configuration(_)));
    }

    #[test]
    fn embedder_dimension_mismatch_fails_fast() {
        let mut cfg = test_config();
        cfg.embedding_dim = DIM + 1;
        let err = MemoryCoordinator::new(cfg, Arc::new(HashEmbedder)).unwrap_err();
        assert!(matches!(err, EngramError::Configuration(_)));
    }

    // ── retrieval ────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn cold_start_bundle_is_empty_and_not_degraded() {
        let coord = coordinator();
        let bundle = coord.retrieve_context("fresh-session", "u1", "anything").await;
        assert!(bundle.history.is_empty());
        assert!(bundle.semantic_hits.is_empty());
        assert!(bundle.goals.is_empty());
        assert!(!bundle.degraded);
    }

    #[tokio::test]
    async fn bundle_carries_history_goals_and_hits() {
        let coord = coordinator();
        coord
            .persist_turn("sess", &Turn::new(Role::User, "how am I doing?"))
            .await
            .unwrap();
        coord
            .procedural()
            .set_goal(&Goal {
                user_id: "u1".to_string(),
                key: "weekly_steps".to_string(),
                value: "70000".to_string(),
                updated_at: chrono::Utc::now(),
            })
            .unwrap();
        let stored = coord
            .extract_and_store_facts(
                "u1",
                &[],
                &StubExtractor(vec!["User prefers oat milk".to_string()]),
            )
            .await;
        assert_eq!(stored, 1);

        // Identical text embeds identically, so the fact comes back as a hit.
        let bundle = coord.retrieve_context("sess", "u1", "User prefers oat milk").await;
        assert_eq!(bundle.history.len(), 1);
        assert_eq!(bundle.goals.len(), 1);
        assert_eq!(bundle.semantic_hits.len(), 1);
        assert_eq!(bundle.semantic_hits[0].0.text, "User prefers oat milk");
        assert!(!bundle.degraded);
    }

    #[tokio::test]
    async fn embedding_failure_degrades_but_does_not_fail() {
        let coord = MemoryCoordinator::new(test_config(), Arc::new(FailingEmbedder)).unwrap();
        coord
            .persist_turn("sess", &Turn::new(Role::User, "hello"))
            .await
            .unwrap();

        let bundle = coord.retrieve_context("sess", "u1", "hello").await;
        assert!(bundle.degraded);
        assert!(bundle.semantic_hits.is_empty());
        // History is still served.
        assert_eq!(bundle.history.len(), 1);
    }

    #[tokio::test]
    async fn embedding_timeout_degrades_but_does_not_fail() {
        let coord = MemoryCoordinator::new(test_config(), Arc::new(SlowEmbedder)).unwrap();
        let bundle = coord.retrieve_context("sess", "u1", "hello").await;
        assert!(bundle.degraded);
        assert!(bundle.semantic_hits.is_empty());
    }

    // ── persistence ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn concurrent_appends_to_one_session_all_land() {
        let coord = Arc::new(coordinator());
        let mut handles = Vec::new();
        for i in 0..8 {
            let coord = Arc::clone(&coord);
            handles.push(tokio::spawn(async move {
                coord
                    .persist_turn("sess", &Turn::new(Role::User, format!("turn {i}")))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(coord.episodic().turn_count("sess").unwrap(), 8);
    }

    #[tokio::test]
    async fn fact_extraction_dedups_repeated_candidates() {
        let coord = coordinator();
        let extractor = StubExtractor(vec!["User is vegetarian".to_string()]);
        coord.extract_and_store_facts("u1", &[], &extractor).await;
        coord.extract_and_store_facts("u1", &[], &extractor).await;
        assert_eq!(coord.semantic().fact_count("u1").unwrap(), 1);
    }

    #[tokio::test]
    async fn extractor_failure_skips_cycle() {
        let coord = coordinator();
        let stored = coord.extract_and_store_facts("u1", &[], &FailingExtractor).await;
        assert_eq!(stored, 0);
        assert_eq!(coord.semantic().fact_count("u1").unwrap(), 0);
    }

    #[tokio::test]
    async fn embedding_failure_skips_candidates_not_cycle() {
        let coord = MemoryCoordinator::new(test_config(), Arc::new(FailingEmbedder)).unwrap();
        let stored = coord
            .extract_and_store_facts(
                "u1",
                &[],
                &StubExtractor(vec!["fact a".to_string(), "fact b".to_string()]),
            )
            .await;
        assert_eq!(stored, 0);
    }

    // ── complete_turn ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn clean_response_is_persisted_unchanged() {
        let coord = coordinator();
        let tools: ToolResults =
            [("heart_rate".to_string(), serde_json::json!(87))].into_iter().collect();

        let (text, report) = coord
            .complete_turn("sess", "Your heart rate was 87 bpm", &tools)
            .await
            .unwrap();
        assert_eq!(text, "Your heart rate was 87 bpm");
        assert!(report.passed);

        let history = coord.episodic().history("sess", 10).unwrap();
        assert_eq!(history[0].content, "Your heart rate was 87 bpm");
        assert_eq!(history[0].role, Role::Assistant);
    }

    #[tokio::test]
    async fn hallucinated_number_is_corrected_before_persisting() {
        let coord = coordinator();
        let tools: ToolResults =
            [("heart_rate".to_string(), serde_json::json!(95))].into_iter().collect();

        let (text, report) = coord
            .complete_turn("sess", "Your heart rate was 130 bpm", &tools)
            .await
            .unwrap();
        assert_eq!(text, "Your heart rate was 95 bpm");
        assert!(!report.passed);
        assert_eq!(report.count(MatchState::Corrected), 1);

        // The corrected text, not the hallucinated one, is what memory keeps.
        let history = coord.episodic().history("sess", 10).unwrap();
        assert_eq!(history[0].content, "Your heart rate was 95 bpm");
    }

    // ── stats & clearing ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn session_stats_count_each_tier() {
        let coord = coordinator();
        coord.persist_turn("sess", &Turn::new(Role::User, "hi")).await.unwrap();
        coord
            .extract_and_store_facts("u1", &[], &StubExtractor(vec!["fact".to_string()]))
            .await;
        coord
            .procedural()
            .set_goal(&Goal {
                user_id: "u1".to_string(),
                key: "target_weight".to_string(),
                value: "78kg".to_string(),
                updated_at: chrono::Utc::now(),
            })
            .unwrap();

        let stats = coord.session_stats("sess", "u1").unwrap();
        assert_eq!(
            stats,
            MemoryStats {
                history_turns: 1,
                fact_count: 1,
                goal_count: 1,
            }
        );
    }

    #[tokio::test]
    async fn clear_session_empties_history_only() {
        let coord = coordinator();
        coord.persist_turn("sess", &Turn::new(Role::User, "hi")).await.unwrap();
        coord
            .extract_and_store_facts("u1", &[], &StubExtractor(vec!["kept".to_string()]))
            .await;

        coord.clear_session("sess").await.unwrap();
        assert_eq!(coord.episodic().turn_count("sess").unwrap(), 0);
        assert_eq!(coord.semantic().fact_count("u1").unwrap(), 1);
    }

    #[tokio::test]
    async fn clear_user_facts_empties_the_index() {
        let coord = coordinator();
        coord
            .extract_and_store_facts("u1", &[], &StubExtractor(vec!["stale".to_string()]))
            .await;
        coord.clear_user_facts("u1").unwrap();

        let bundle = coord.retrieve_context("sess", "u1", "stale").await;
        assert!(bundle.semantic_hits.is_empty());
    }
}
