//! Text embeddings for the vector store.
//!
//! [`EmbeddingAdapter::embed`] never fails: blank text, a missing provider,
//! a provider error and a wrong-sized response all degrade to the same
//! deterministic low-magnitude fallback vector, so every vector-store write
//! has an embedding of the configured dimension.

use crate::config::EmbeddingConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Generates embedding vectors from text.
pub trait EmbeddingProvider: Send + Sync {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>>;

    /// The model name used by this provider (e.g. "text-embedding-3-small").
    fn model_name(&self) -> &str;

    /// The dimensionality of the embeddings produced.
    fn dimensions(&self) -> usize;
}

/// OpenAI-compatible `/v1/embeddings` client.
pub struct OpenAiEmbeddingProvider {
    client: reqwest::blocking::Client,
    api_key: Secret<String>,
    base_url: String,
    model: String,
    dims: usize,
}

impl OpenAiEmbeddingProvider {
    pub fn new(api_key: Secret<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            api_key,
            base_url: "https://api.openai.com".to_string(),
            model: "text-embedding-3-small".to_string(),
            dims: 1536,
        })
    }

    pub fn with_model(mut self, model: String, dims: usize) -> Self {
        self.model = model;
        self.dims = dims;
        self
    }

    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url.trim_end_matches('/').to_string();
        self
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: [&'a str; 1],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        let req = EmbeddingRequest {
            model: &self.model,
            input: [text],
        };
        let resp = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&req)
            .send()?
            .error_for_status()?
            .json::<EmbeddingResponse>()?;

        resp.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow::anyhow!("empty embedding response"))
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dims
    }
}

/// Why an embedding is the fallback vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FallbackReason {
    BlankText,
    NoProvider,
    ProviderError(String),
    DimensionMismatch { expected: usize, got: usize },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbeddingSource {
    Provider,
    Fallback(FallbackReason),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub vector: Vec<f32>,
    pub source: EmbeddingSource,
}

impl Embedding {
    pub fn is_fallback(&self) -> bool {
        matches!(self.source, EmbeddingSource::Fallback(_))
    }
}

/// Deterministic stand-in vector for `text`: `dimensions` values in
/// `[-0.01, 0.01]`, seeded from the SHA-256 digest of the text.
pub fn fallback_embedding(text: &str, dimensions: usize) -> Vec<f32> {
    let digest = Sha256::digest(text.as_bytes());
    let mut seed = [0u8; 8];
    seed.copy_from_slice(&digest[..8]);
    let mut rng = StdRng::seed_from_u64(u64::from_le_bytes(seed));
    (0..dimensions)
        .map(|_| rng.random_range(-0.01f32..=0.01))
        .collect()
}

/// Wraps an optional [`EmbeddingProvider`] with the fallback policy.
#[derive(Clone)]
pub struct EmbeddingAdapter {
    provider: Option<Arc<dyn EmbeddingProvider>>,
    dimensions: usize,
}

impl EmbeddingAdapter {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, dimensions: usize) -> Self {
        Self {
            provider: Some(provider),
            dimensions,
        }
    }

    /// An adapter that always returns the fallback vector.
    pub fn fallback_only(dimensions: usize) -> Self {
        Self {
            provider: None,
            dimensions,
        }
    }

    /// Build the adapter from configuration. Without an API key every
    /// embedding is the fallback.
    pub fn from_config(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let Some(key) = config
            .api_key
            .as_ref()
            .filter(|k| !k.expose_secret().trim().is_empty())
        else {
            info!("no embedding API key configured; using fallback embeddings");
            return Ok(Self::fallback_only(config.dimensions));
        };
        let provider = OpenAiEmbeddingProvider::new(
            Secret::new(key.expose_secret().clone()),
            Duration::from_secs(config.timeout_secs),
        )?
        .with_model(config.model.clone(), config.dimensions)
        .with_base_url(config.base_url.clone());
        info!(model = %config.model, dimensions = config.dimensions, "embedding provider configured");
        Ok(Self::new(Arc::new(provider), config.dimensions))
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn embed(&self, text: &str) -> Embedding {
        if text.trim().is_empty() {
            return self.fallback(text, FallbackReason::BlankText);
        }
        let Some(provider) = &self.provider else {
            return self.fallback(text, FallbackReason::NoProvider);
        };
        match provider.embed(text) {
            Ok(vector) if vector.len() == self.dimensions => {
                debug!(model = provider.model_name(), "embedded text");
                Embedding {
                    vector,
                    source: EmbeddingSource::Provider,
                }
            }
            Ok(vector) => {
                warn!(
                    model = provider.model_name(),
                    expected = self.dimensions,
                    got = vector.len(),
                    "embedding dimension mismatch; using fallback"
                );
                self.fallback(
                    text,
                    FallbackReason::DimensionMismatch {
                        expected: self.dimensions,
                        got: vector.len(),
                    },
                )
            }
            Err(e) => {
                warn!(model = provider.model_name(), error = %e, "embedding provider failed; using fallback");
                self.fallback(text, FallbackReason::ProviderError(e.to_string()))
            }
        }
    }

    fn fallback(&self, text: &str, reason: FallbackReason) -> Embedding {
        Embedding {
            vector: fallback_embedding(text, self.dimensions),
            source: EmbeddingSource::Fallback(reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider {
        result: Result<Vec<f32>, String>,
    }

    impl EmbeddingProvider for FixedProvider {
        fn embed(&self, _text: &str) -> anyhow::Result<Vec<f32>> {
            self.result.clone().map_err(|e| anyhow::anyhow!(e))
        }
        fn model_name(&self) -> &str {
            "fixed"
        }
        fn dimensions(&self) -> usize {
            3
        }
    }

    fn adapter(result: Result<Vec<f32>, String>) -> EmbeddingAdapter {
        EmbeddingAdapter::new(Arc::new(FixedProvider { result }), 3)
    }

    #[test]
    fn fallback_is_deterministic_and_small() {
        let a = fallback_embedding("the lighthouse", 1536);
        let b = fallback_embedding("the lighthouse", 1536);
        assert_eq!(a.len(), 1536);
        assert_eq!(a, b);
        assert!(a.iter().all(|v| v.abs() <= 0.01));
        assert_ne!(a, fallback_embedding("the harbor", 1536));
    }

    #[test]
    fn provider_result_passes_through() {
        let emb = adapter(Ok(vec![0.1, 0.2, 0.3])).embed("hello");
        assert_eq!(emb.vector, vec![0.1, 0.2, 0.3]);
        assert_eq!(emb.source, EmbeddingSource::Provider);
    }

    #[test]
    fn blank_text_uses_fallback() {
        let emb = adapter(Ok(vec![0.1, 0.2, 0.3])).embed("   ");
        assert_eq!(emb.source, EmbeddingSource::Fallback(FallbackReason::BlankText));
        assert_eq!(emb.vector.len(), 3);
    }

    #[test]
    fn provider_outage_uses_same_fallback_every_time() {
        let down = adapter(Err("503 service unavailable".into()));
        let first = down.embed("storm at sea");
        let second = down.embed("storm at sea");
        assert!(first.is_fallback());
        assert_eq!(first.vector, second.vector);
        assert_eq!(first.vector, fallback_embedding("storm at sea", 3));
    }

    #[test]
    fn wrong_dimension_uses_fallback() {
        let emb = adapter(Ok(vec![1.0; 5])).embed("hello");
        assert_eq!(
            emb.source,
            EmbeddingSource::Fallback(FallbackReason::DimensionMismatch {
                expected: 3,
                got: 5
            })
        );
        assert_eq!(emb.vector.len(), 3);
    }

    #[test]
    fn missing_api_key_means_fallback_only() {
        let config = EmbeddingConfig::default();
        let adapter = EmbeddingAdapter::from_config(&config).unwrap();
        let emb = adapter.embed("hello");
        assert_eq!(emb.source, EmbeddingSource::Fallback(FallbackReason::NoProvider));
        assert_eq!(emb.vector.len(), 1536);
    }

    #[test]
    fn unreachable_provider_falls_back() {
        let config = EmbeddingConfig {
            base_url: "http://127.0.0.1:9".into(),
            api_key: Some(Secret::new("sk-test".into())),
            timeout_secs: 2,
            dimensions: 8,
            ..EmbeddingConfig::default()
        };
        let adapter = EmbeddingAdapter::from_config(&config).unwrap();
        let emb = adapter.embed("hello");
        assert!(matches!(
            emb.source,
            EmbeddingSource::Fallback(FallbackReason::ProviderError(_))
        ));
        assert_eq!(emb.vector.len(), 8);
    }
}
