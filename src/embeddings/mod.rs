// src/embeddings/mod.rs
// Embedding generation strategies. Mirrors the
// teacher's `EmbeddingBackend` facade: a small trait plus an enum that
// dispatches to whichever backend the project is configured with, so the
// rest of the pipeline never has to match on strategy kind itself.

use async_trait::async_trait;
use tracing::warn;

use crate::config::file::EmbeddingStrategyKind;
use crate::error::{LaminarkError, Result};

pub const EMBEDDING_MODEL_LOCAL: &str = "laminark-local-v1";
pub const EMBEDDING_VERSION: &str = "1";

/// A pluggable way to turn text into a fixed-dimension embedding. Hosts
/// that don't want to run a local model can delegate this entirely.
#[async_trait]
pub trait EmbeddingStrategy: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
    fn model_name(&self) -> &str;
}

/// Calls a local HTTP embedding endpoint (e.g. an Ollama-compatible
/// `/api/embeddings` server) — the default when no host delegation is
/// configured.
pub struct LocalStrategy {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl LocalStrategy {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
        }
    }
}

#[derive(serde::Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(serde::Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingStrategy for LocalStrategy {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&EmbedRequest {
                model: &self.model,
                prompt: text,
            })
            .send()
            .await?
            .error_for_status()?
            .json::<EmbedResponse>()
            .await?;
        Ok(resp.embedding)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Embeddings are supplied by the host at write time (e.g. the calling
/// assistant already has an embedding client) rather than computed here.
/// The pipeline worker never calls this for pending rows — rows under
/// this strategy simply never enter the pending queue because the host
/// provides `embedding`/`embedding_model` directly on `save_memory`.
pub struct HostDelegatedStrategy;

#[async_trait]
impl EmbeddingStrategy for HostDelegatedStrategy {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(LaminarkError::Unavailable(
            "embeddings are host-delegated for this project".to_string(),
        ))
    }

    fn model_name(&self) -> &str {
        "host-delegated"
    }
}

/// Try the local backend; on failure, degrade to leaving the observation
/// pending rather than failing the caller — the next worker pass retries.
pub struct HybridStrategy {
    local: LocalStrategy,
}

impl HybridStrategy {
    pub fn new(local: LocalStrategy) -> Self {
        Self { local }
    }
}

#[async_trait]
impl EmbeddingStrategy for HybridStrategy {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match self.local.embed(text).await {
            Ok(embedding) => Ok(embedding),
            Err(e) => {
                warn!(error = %e, "local embedding backend unavailable, leaving pending");
                Err(LaminarkError::Unavailable(e.to_string()))
            }
        }
    }

    fn model_name(&self) -> &str {
        self.local.model_name()
    }
}

/// Build the configured strategy. Construction is lazy at the call site —
/// callers typically wrap this in `OnceCell`/`Arc` and build it on first
/// use so a project that never saves a memory never pays for a client.
pub fn build_strategy(kind: EmbeddingStrategyKind, local_endpoint: &str) -> Box<dyn EmbeddingStrategy> {
    match kind {
        EmbeddingStrategyKind::Local => {
            Box::new(LocalStrategy::new(local_endpoint, EMBEDDING_MODEL_LOCAL))
        }
        EmbeddingStrategyKind::HostDelegated => Box::new(HostDelegatedStrategy),
        EmbeddingStrategyKind::Hybrid => {
            Box::new(HybridStrategy::new(LocalStrategy::new(local_endpoint, EMBEDDING_MODEL_LOCAL)))
        }
    }
}

/// Serialize an embedding vector to the little-endian byte blob stored in
/// `observations.embedding` and read back by `vec_observations`.
pub fn encode(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn decode(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let original = vec![0.1f32, -0.5, 2.25];
        let bytes = encode(&original);
        let decoded = decode(&bytes);
        assert_eq!(original, decoded);
    }

    #[tokio::test]
    async fn host_delegated_strategy_never_computes_locally() {
        let strategy = HostDelegatedStrategy;
        let result = strategy.embed("anything").await;
        assert!(result.is_err());
    }
}
