//! `engram-runtime` – Coordination & Collaborator Seams
//!
//! Glues the three memory tiers and the numeric validator into the per-turn
//! API the agent loop consumes, and owns the seams to the external
//! collaborators (embedding server, fact extraction, configuration).
//!
//! # Modules
//!
//! - [`coordinator`] – [`MemoryCoordinator`][coordinator::MemoryCoordinator]:
//!   unified context retrieval (with graceful degradation), per-session
//!   serialised persistence, validated turn completion, and the upward-facing
//!   stats/clear endpoints.
//! - [`config`] – [`EngramConfig`][config::EngramConfig]: every domain-tuning
//!   parameter as configuration, validated fail-fast at startup.
//! - [`embedder`] – [`Embedder`][embedder::Embedder] trait and the
//!   Ollama-compatible [`OllamaEmbedder`][embedder::OllamaEmbedder].
//! - [`extraction`] – [`FactExtractor`][extraction::FactExtractor]: the
//!   external summarisation seam that produces fact candidates.
//! - [`stream`] – bounded-channel assembly of token-streamed responses;
//!   validation runs once on the completed text.
//! - [`telemetry`] – `tracing` subscriber setup.

pub mod config;
pub mod coordinator;
pub mod embedder;
pub mod extraction;
pub mod stream;
pub mod telemetry;

pub use config::EngramConfig;
pub use coordinator::{ContextBundle, MemoryCoordinator, MemoryStats};
pub use embedder::{Embedder, OllamaEmbedder};
pub use extraction::FactExtractor;
pub use telemetry::init_tracing;
