//! [`Embedder`] – the text-to-vector seam.
//!
//! The memory core treats embedding computation as a black box behind this
//! trait: deterministic for identical input (dedup and caching depend on
//! that), potentially slow, and allowed to fail without taking the
//! conversation turn down with it.
//!
//! [`OllamaEmbedder`] talks to a locally-running Ollama-compatible
//! `/api/embeddings` endpoint.
//!
//! # Example
//!
//! ```rust,no_run
//! use engram_runtime::embedder::OllamaEmbedder;
//!
//! let embedder = OllamaEmbedder::new("http://localhost:11434", "nomic-embed-text", 768);
//! // Requires a running Ollama instance – skipped in unit tests.
//! // let vector = embedder.embed("prefers morning runs").await?;
//! ```

use async_trait::async_trait;
use engram_types::EngramError;
use serde::{Deserialize, Serialize};

/// Maps text to a fixed-dimension dense vector.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `text`. Must return the same vector for the same input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngramError>;

    /// Dimension of every vector this embedder produces.
    fn dimension(&self) -> usize;
}

// ─────────────────────────────────────────────────────────────────────────────
// Internal request / response shapes
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    embedding: Vec<f32>,
}

// ─────────────────────────────────────────────────────────────────────────────
// OllamaEmbedder
// ─────────────────────────────────────────────────────────────────────────────

/// An async client for an Ollama-compatible `/api/embeddings` endpoint.
///
/// Construct once and reuse; the underlying HTTP client pools connections.
pub struct OllamaEmbedder {
    base_url: String,
    model: String,
    dimension: usize,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    /// Create a new embedder pointing at `base_url` (e.g.
    /// `"http://localhost:11434"`) using `model`, producing `dimension`-wide
    /// vectors.
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            dimension,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EngramError> {
        let url = format!("{}/api/embeddings", self.base_url);
        let body = EmbeddingRequest {
            model: &self.model,
            prompt: text,
        };

        let response: EmbeddingResponse = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EngramError::EmbeddingUnavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| EngramError::EmbeddingUnavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| EngramError::EmbeddingUnavailable(e.to_string()))?;

        if response.embedding.len() != self.dimension {
            return Err(EngramError::EmbeddingUnavailable(format!(
                "server returned dimension {} but {} is configured",
                response.embedding.len(),
                self.dimension
            )));
        }
        Ok(response.embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}
