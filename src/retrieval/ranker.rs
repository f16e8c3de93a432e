//! Hybrid ranker
//!
//! Combines the four normalized component scores with a bucket's weights,
//! sorts deterministically and greedily fills a diverse exemplar pack.
//! Ranking is read-only: it never writes to the indices or the policy store,
//! so a dropped call has no side effects.

use crate::config::{EngineConfig, NormalizationConfig, RankingConfig, NEUTRAL_SCORE};
use crate::embeddings::{cosine_similarity, EmbeddingIndex};
use crate::policy::ArmId;
use crate::retrieval::lexical::Bm25Scorer;
use crate::retrieval::normalize;
use crate::types::{
    BucketKey, FragmentId, FragmentRole, ItemId, ReferenceItem, RetrievalContext, TemperatureBand,
    WeightVector,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

/// Normalized component scores of one candidate
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComponentScores {
    /// `None` when the candidate or the query has no embedding
    pub semantic: Option<f64>,
    pub lexical: f64,
    pub quality: f64,
    pub freshness: f64,
}

impl ComponentScores {
    /// Weighted combination
    ///
    /// Without a semantic score the remaining weights are renormalized for
    /// this candidate only.
    pub fn combine(&self, weights: &WeightVector) -> f64 {
        let rest = weights.lexical * self.lexical
            + weights.quality * self.quality
            + weights.freshness * self.freshness;

        match self.semantic {
            Some(sem) => weights.semantic * sem + rest,
            None => {
                let remaining = weights.lexical + weights.quality + weights.freshness;
                if remaining <= f64::EPSILON {
                    NEUTRAL_SCORE
                } else {
                    rest / remaining
                }
            }
        }
    }
}

/// One ranked exemplar
#[derive(Debug, Clone, Serialize)]
pub struct PackEntry {
    /// Zero-based position in the pack
    pub rank: usize,
    pub item_id: ItemId,
    pub fragment_id: Option<FragmentId>,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub components: ComponentScores,
    pub score: f64,
    /// Semantic term was dropped for this entry
    pub degraded: bool,
    #[serde(skip)]
    pub embedding: Option<Arc<Vec<f32>>>,
    /// The item's hook, caption and other non-`Full` fragments
    #[serde(skip)]
    pub references: Vec<ReferenceFragment>,
}

/// Fragment-level reference of a ranked item
#[derive(Debug, Clone)]
pub struct ReferenceFragment {
    pub fragment_id: FragmentId,
    pub role: FragmentRole,
    pub text: String,
    /// `None` when the index has no current vector
    pub embedding: Option<Arc<Vec<f32>>>,
}

/// Ranked, deduplicated output of one retrieval call
#[derive(Debug, Clone, Serialize)]
pub struct ExemplarPack {
    pub bucket: BucketKey,
    pub weights: WeightVector,
    pub entries: Vec<PackEntry>,
    pub pool_size: usize,
    pub degraded_count: usize,
    pub near_duplicates_skipped: usize,
    /// Arm trialed in the generation round this pack feeds
    pub arm: Option<ArmId>,
    pub temperatures: TemperatureBand,
    pub created_at: DateTime<Utc>,
}

impl ExemplarPack {
    pub fn empty(bucket: BucketKey, weights: WeightVector, now: DateTime<Utc>) -> Self {
        Self {
            bucket,
            weights,
            entries: Vec::new(),
            pool_size: 0,
            degraded_count: 0,
            near_duplicates_skipped: 0,
            arm: None,
            temperatures: TemperatureBand::default(),
            created_at: now,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn item_ids(&self) -> Vec<ItemId> {
        self.entries.iter().map(|e| e.item_id).collect()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded_count > 0
    }
}

struct Scored<'a> {
    item: &'a ReferenceItem,
    text: String,
    embedding: Option<Arc<Vec<f32>>>,
    components: ComponentScores,
    score: f64,
}

/// Hybrid ranker
#[derive(Debug, Clone)]
pub struct HybridRanker {
    normalization: NormalizationConfig,
    ranking: RankingConfig,
}

impl HybridRanker {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            normalization: config.normalization.clone(),
            ranking: config.ranking.clone(),
        }
    }

    pub fn default_pack_size(&self) -> usize {
        self.ranking.pack_size
    }

    /// Rank `pool` for `context` into a pack of at most `k` entries
    ///
    /// `query_embedding` is `None` when the query could not be embedded;
    /// every entry is then degraded. Never fails: a non-empty pool with
    /// `k > 0` always yields a non-empty pack.
    #[allow(clippy::too_many_arguments)]
    pub fn rank(
        &self,
        context: &RetrievalContext,
        pool: &[ReferenceItem],
        weights: &WeightVector,
        query_embedding: Option<&[f32]>,
        index: &EmbeddingIndex,
        k: usize,
        now: DateTime<Utc>,
    ) -> ExemplarPack {
        let weights = weights.normalized();
        let mut pack = ExemplarPack::empty(context.bucket(), weights, now);
        pack.pool_size = pool.len();

        if pool.is_empty() || k == 0 {
            debug!("Empty pool or pack size for {}", pack.bucket);
            return pack;
        }

        let mut scored = self.score_pool(context, pool, &weights, query_embedding, index, now);
        scored.sort_by(compare_scored);

        for candidate in scored {
            if pack.entries.len() >= k {
                break;
            }

            if let Some(emb) = &candidate.embedding {
                let duplicate = pack.entries.iter().any(|selected| {
                    selected.embedding.as_ref().is_some_and(|other| {
                        cosine_similarity(emb, other) as f64 > self.ranking.near_duplicate_threshold
                    })
                });
                if duplicate {
                    pack.near_duplicates_skipped += 1;
                    continue;
                }
            }

            let degraded = candidate.components.semantic.is_none();
            if degraded {
                pack.degraded_count += 1;
            }

            let fragment_id = candidate.item.ranking_fragment().map(|f| f.id);
            let references = candidate
                .item
                .fragments
                .iter()
                .filter(|f| f.role != FragmentRole::Full && !f.text.trim().is_empty())
                .map(|f| ReferenceFragment {
                    fragment_id: f.id,
                    role: f.role,
                    text: f.text.clone(),
                    embedding: index.get(f),
                })
                .collect();

            pack.entries.push(PackEntry {
                rank: pack.entries.len(),
                item_id: candidate.item.id,
                fragment_id,
                text: candidate.text,
                created_at: candidate.item.created_at,
                components: candidate.components,
                score: candidate.score,
                degraded,
                embedding: candidate.embedding,
                references,
            });
        }

        if pack.degraded_count > 0 {
            warn!(
                "Pack for {} has {} degraded entries (missing embeddings)",
                pack.bucket, pack.degraded_count
            );
        }
        debug!(
            "Ranked {} candidates into {} exemplars for {} ({} near-duplicates skipped)",
            pack.pool_size,
            pack.entries.len(),
            pack.bucket,
            pack.near_duplicates_skipped
        );

        pack
    }

    fn score_pool<'a>(
        &self,
        context: &RetrievalContext,
        pool: &'a [ReferenceItem],
        weights: &WeightVector,
        query_embedding: Option<&[f32]>,
        index: &EmbeddingIndex,
        now: DateTime<Utc>,
    ) -> Vec<Scored<'a>> {
        let texts: Vec<String> = pool.iter().map(ReferenceItem::ranking_text).collect();
        let bm25 = Bm25Scorer::new(&texts, self.ranking.bm25_k1, self.ranking.bm25_b);
        let lexical = normalize::min_max(&bm25.score_all(&context.query_text()));

        pool.iter()
            .zip(texts)
            .zip(lexical)
            .map(|((item, text), lexical)| {
                let embedding = index.item_embedding(item);
                let semantic = match (query_embedding, embedding.as_deref()) {
                    (Some(query), Some(emb)) if query.len() == emb.len() => {
                        Some(normalize::semantic(cosine_similarity(query, emb) as f64))
                    }
                    _ => None,
                };

                let components = ComponentScores {
                    semantic,
                    lexical,
                    quality: normalize::quality(&item.quality, &self.normalization),
                    freshness: normalize::freshness_at(
                        item.created_at,
                        now,
                        self.normalization.freshness_decay_days,
                    ),
                };
                let score = components.combine(weights);

                Scored {
                    item,
                    text,
                    embedding,
                    components,
                    score,
                }
            })
            .collect()
    }
}

/// Score desc, then newer first, then item id
fn compare_scored(a: &Scored<'_>, b: &Scored<'_>) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| b.item.created_at.cmp(&a.item.created_at))
        .then_with(|| a.item.id.cmp(&b.item.id))
}
