//! Per-fragment embedding index
//!
//! Embeddings are tagged with the hash of the text they were computed from.
//! Editing a fragment changes its hash, so the stale vector is reported as
//! missing until `refresh_missing` recomputes it. Readers never block each
//! other; the map is sharded.

use crate::embeddings::EmbeddingService;
use crate::error::Result;
use crate::types::{Fragment, FragmentId, FragmentRole, ReferenceItem};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Embedding plus the text hash it belongs to
#[derive(Debug, Clone)]
pub struct StoredEmbedding {
    pub vector: Arc<Vec<f32>>,
    pub text_hash: String,
}

/// Concurrent fragment id → embedding map
#[derive(Debug, Default)]
pub struct EmbeddingIndex {
    entries: DashMap<FragmentId, StoredEmbedding>,
}

impl EmbeddingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the embedding of a fragment's current text
    pub fn insert(&self, fragment: &Fragment, vector: Vec<f32>) {
        self.entries.insert(
            fragment.id,
            StoredEmbedding {
                vector: Arc::new(vector),
                text_hash: fragment.text_hash(),
            },
        );
    }

    /// Current embedding of a fragment, `None` if missing or stale
    pub fn get(&self, fragment: &Fragment) -> Option<Arc<Vec<f32>>> {
        let entry = self.entries.get(&fragment.id)?;
        if entry.text_hash == fragment.text_hash() {
            Some(Arc::clone(&entry.vector))
        } else {
            None
        }
    }

    pub fn remove(&self, id: &FragmentId) -> bool {
        self.entries.remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embedding representing a whole item in ranking
    ///
    /// The `Full` fragment's vector when the item has one; otherwise the
    /// mean of all fragment vectors, missing if any fragment is missing.
    pub fn item_embedding(&self, item: &ReferenceItem) -> Option<Arc<Vec<f32>>> {
        if let Some(full) = item.fragments.iter().find(|f| f.role == FragmentRole::Full) {
            return self.get(full);
        }
        if item.fragments.is_empty() {
            return None;
        }

        let vectors: Vec<Arc<Vec<f32>>> = item
            .fragments
            .iter()
            .map(|f| self.get(f))
            .collect::<Option<Vec<_>>>()?;
        if vectors.len() == 1 {
            return vectors.into_iter().next();
        }

        let dim = vectors[0].len();
        if vectors.iter().any(|v| v.len() != dim) {
            return None;
        }
        let mut mean = vec![0.0f32; dim];
        for v in &vectors {
            for (acc, x) in mean.iter_mut().zip(v.iter()) {
                *acc += x;
            }
        }
        let n = vectors.len() as f32;
        mean.iter_mut().for_each(|x| *x /= n);
        Some(Arc::new(mean))
    }

    /// Compute embeddings for fragments lacking a current one
    ///
    /// Returns how many embeddings were computed.
    pub async fn refresh_missing(
        &self,
        fragments: &[Fragment],
        embedder: &dyn EmbeddingService,
    ) -> Result<usize> {
        let stale: Vec<&Fragment> = fragments
            .iter()
            .filter(|f| self.get(f).is_none() && !f.text.trim().is_empty())
            .collect();

        if stale.is_empty() {
            debug!("Embedding index up to date ({} fragments)", fragments.len());
            return Ok(0);
        }

        let texts: Vec<&str> = stale.iter().map(|f| f.text.as_str()).collect();
        let vectors = embedder.embed_batch(&texts).await?;

        for (fragment, vector) in stale.iter().zip(vectors.into_iter()) {
            self.insert(fragment, vector);
        }

        info!(
            "Computed {} embeddings with {}",
            stale.len(),
            embedder.model_name()
        );
        Ok(stale.len())
    }

    /// Refresh every fragment of every item
    pub async fn refresh_items(
        &self,
        items: &[ReferenceItem],
        embedder: &dyn EmbeddingService,
    ) -> Result<usize> {
        let fragments: Vec<Fragment> = items
            .iter()
            .flat_map(|item| item.fragments.iter().cloned())
            .collect();
        self.refresh_missing(&fragments, embedder).await
    }
}
