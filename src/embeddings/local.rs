//! Local embedding service using fastembed
//!
//! Models are downloaded on first use to the cache directory and loaded from
//! cache afterwards. fastembed is synchronous, so every call runs in a
//! blocking task.

use crate::embeddings::EmbeddingService;
use crate::error::{CalliopeError, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tokio::task;
use tracing::{debug, info};

/// Local embedding service using fastembed
pub struct LocalEmbeddingService {
    model: Arc<Mutex<TextEmbedding>>,
    model_name: String,
    dimensions: usize,
}

impl LocalEmbeddingService {
    /// Load a model, downloading it if not cached
    pub async fn new(model_name: &str, cache_dir: Option<PathBuf>) -> Result<Self> {
        info!("Initializing local embedding service: model={}", model_name);

        let (embedding_model, dimensions) = Self::resolve_model(model_name)?;

        let mut init_options = InitOptions::default();
        init_options.model_name = embedding_model;
        init_options.show_download_progress = false;
        if let Some(dir) = cache_dir {
            init_options.cache_dir = dir;
        }

        let model = task::spawn_blocking(move || TextEmbedding::try_new(init_options))
            .await
            .map_err(|e| CalliopeError::Other(format!("Task join error: {}", e)))?
            .map_err(|e| CalliopeError::Embedding(format!("Failed to load model: {}", e)))?;

        info!("Local embedding service ready: {} dimensions", dimensions);

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    fn resolve_model(model_name: &str) -> Result<(EmbeddingModel, usize)> {
        match model_name {
            "all-MiniLM-L6-v2" => Ok((EmbeddingModel::AllMiniLML6V2, 384)),
            "all-MiniLM-L12-v2" => Ok((EmbeddingModel::AllMiniLML12V2, 384)),
            "bge-small-en-v1.5" => Ok((EmbeddingModel::BGESmallENV15, 384)),
            "bge-base-en-v1.5" => Ok((EmbeddingModel::BGEBaseENV15, 768)),
            "nomic-embed-text-v1.5" => Ok((EmbeddingModel::NomicEmbedTextV15, 768)),
            _ => Err(CalliopeError::Config(format!(
                "Unsupported local embedding model: '{}'",
                model_name
            ))),
        }
    }

    async fn embed_batch_internal(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Embedding batch of {} texts", texts.len());

        let model = Arc::clone(&self.model);
        let embeddings = task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|e| format!("Mutex lock failed: {}", e))?;
            guard
                .embed(texts, None)
                .map_err(|e| format!("Embedding generation failed: {}", e))
        })
        .await
        .map_err(|e| CalliopeError::Other(format!("Task join error: {}", e)))?
        .map_err(CalliopeError::Embedding)?;

        for (i, embedding) in embeddings.iter().enumerate() {
            if embedding.len() != self.dimensions {
                return Err(CalliopeError::Embedding(format!(
                    "Embedding {} has wrong dimensions: expected {}, got {}",
                    i,
                    self.dimensions,
                    embedding.len()
                )));
            }
        }

        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingService for LocalEmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch_internal(vec![text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| CalliopeError::Embedding("No embedding generated".to_string()))
    }

    async fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.embed_batch_internal(texts.iter().map(|s| s.to_string()).collect())
            .await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model_name
    }
}
