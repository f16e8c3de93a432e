//! Embedding generation and lookup for semantic similarity
//!
//! Provides a deterministic hashing embedder, a remote OpenAI-compatible
//! provider, an optional local fastembed provider, the per-fragment
//! embedding index consumed by the ranker and the copy guard, and the
//! factory picking a provider from configuration.

pub mod hashing;
pub mod index;
#[cfg(feature = "local-embeddings")]
pub mod local;
pub mod remote;

pub use hashing::{HashingEmbedder, HASHING_EMBEDDING_DIM};
pub use index::{EmbeddingIndex, StoredEmbedding};
#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbeddingService;
pub use remote::RemoteEmbeddingService;

use crate::config::{EmbedderConfig, EmbedderProvider};
use crate::error::{CalliopeError, Result};
use async_trait::async_trait;
use std::env;
use std::sync::Arc;
use tracing::info;

/// API key of the remote embedding provider
pub const EMBEDDING_API_KEY_ENV: &str = "CALLIOPE_EMBEDDING_API_KEY";

/// Fallback API key variable for OpenAI-compatible providers
pub const FALLBACK_EMBEDDING_API_KEY_ENV: &str = "OPENAI_API_KEY";

/// Default model of the local provider
pub const DEFAULT_LOCAL_MODEL: &str = "all-MiniLM-L6-v2";

/// Embedding service trait defining required operations
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batched)
    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Get embedding dimensionality
    fn dimensions(&self) -> usize;

    /// Get model name
    fn model_name(&self) -> &str;
}

/// Remote embedding API key from the environment
pub fn embedding_api_key_from_env() -> Option<String> {
    [EMBEDDING_API_KEY_ENV, FALLBACK_EMBEDDING_API_KEY_ENV]
        .into_iter()
        .filter_map(|name| env::var(name).ok())
        .find(|key| !key.trim().is_empty())
}

/// Embedder selected by the configuration, keyed from the environment
pub async fn from_config(config: &EmbedderConfig) -> Result<Arc<dyn EmbeddingService>> {
    build_embedder(config, embedding_api_key_from_env()).await
}

/// Embedder selected by the configuration
///
/// `api_key` is only read by the remote provider, which fails without one.
pub async fn build_embedder(
    config: &EmbedderConfig,
    api_key: Option<String>,
) -> Result<Arc<dyn EmbeddingService>> {
    let service: Arc<dyn EmbeddingService> = match config.provider {
        EmbedderProvider::Hashing => Arc::new(match config.dimensions {
            Some(dimensions) => HashingEmbedder::with_dimensions(dimensions),
            None => HashingEmbedder::new(),
        }),
        EmbedderProvider::Remote => {
            let api_key = api_key.ok_or_else(|| {
                CalliopeError::Config(format!(
                    "remote embedder needs {} or {}",
                    EMBEDDING_API_KEY_ENV, FALLBACK_EMBEDDING_API_KEY_ENV
                ))
            })?;
            let service =
                RemoteEmbeddingService::new(api_key, config.model.clone(), config.base_url.clone())?;
            Arc::new(match config.dimensions {
                Some(dimensions) => service.with_dimensions(dimensions),
                None => service,
            })
        }
        EmbedderProvider::Local => local_embedder(config).await?,
    };

    info!(
        "Using {} embedder {} ({} dimensions)",
        config.provider.name(),
        service.model_name(),
        service.dimensions()
    );
    Ok(service)
}

#[cfg(feature = "local-embeddings")]
async fn local_embedder(config: &EmbedderConfig) -> Result<Arc<dyn EmbeddingService>> {
    let model = config.model.as_deref().unwrap_or(DEFAULT_LOCAL_MODEL);
    let service = LocalEmbeddingService::new(model, config.cache_dir.clone()).await?;
    Ok(Arc::new(service))
}

#[cfg(not(feature = "local-embeddings"))]
async fn local_embedder(_config: &EmbedderConfig) -> Result<Arc<dyn EmbeddingService>> {
    Err(CalliopeError::Config(
        "local embedder requires the local-embeddings feature".to_string(),
    ))
}

/// Calculate cosine similarity between two vectors
///
/// Mismatched lengths and zero vectors yield 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    (dot_product / (magnitude_a * magnitude_b)).clamp(-1.0, 1.0)
}
