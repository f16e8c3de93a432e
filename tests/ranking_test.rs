//! Integration tests for hybrid ranking
//!
//! Covers:
//! - Deterministic ordering and component breakdowns
//! - Quality shrinkage ordering across rating counts
//! - Degraded ranking when embeddings are missing
//! - Weight sensitivity and pack size limits

mod common;

use calliope_core::{
    embeddings::{EmbeddingIndex, HashingEmbedder},
    policy::ArmId,
    retrieval::HybridRanker,
    types::{ItemId, RetrievalContext, WeightVector},
    EngineConfig,
};
use chrono::Utc;
use common::{comedy_pool, context, item};

async fn indexed(pool: &[calliope_core::ReferenceItem]) -> EmbeddingIndex {
    let index = EmbeddingIndex::new();
    index
        .refresh_items(pool, &HashingEmbedder::new())
        .await
        .expect("indexing");
    index
}

#[tokio::test]
async fn test_ranking_is_deterministic() {
    let now = Utc::now();
    let pool = comedy_pool(now);
    let index = indexed(&pool).await;
    let ranker = HybridRanker::new(&EngineConfig::default());
    let ctx = context().with_seed_text("cat workout");
    let query = HashingEmbedder::new().embed_text(&ctx.query_text());

    let first = ranker.rank(&ctx, &pool, &WeightVector::default(), Some(&query), &index, 8, now);
    let second = ranker.rank(&ctx, &pool, &WeightVector::default(), Some(&query), &index, 8, now);

    assert_eq!(first.item_ids(), second.item_ids());
    for (a, b) in first.entries.iter().zip(second.entries.iter()) {
        assert_eq!(a.components, b.components);
        assert_eq!(a.score, b.score);
    }
}

#[tokio::test]
async fn test_shrinkage_orders_rating_counts() {
    let now = Utc::now();
    let pool = vec![
        item("unrated skit about parking tickets", now, 5, 0, 0.0),
        item("single rating skit about lost luggage", now, 5, 1, 5.0),
        item("twenty ratings skit about group chats", now, 5, 20, 5.0),
    ];
    let index = indexed(&pool).await;
    let ranker = HybridRanker::new(&EngineConfig::default());
    let ctx = context();

    let pack = ranker.rank(&ctx, &pool, &WeightVector::default(), None, &index, 8, now);
    assert_eq!(pack.len(), 3);

    let quality_of = |id: ItemId| {
        pack.entries
            .iter()
            .find(|e| e.item_id == id)
            .map(|e| e.components.quality)
            .expect("item in pack")
    };
    let q0 = quality_of(pool[0].id);
    let q1 = quality_of(pool[1].id);
    let q20 = quality_of(pool[2].id);

    assert!(q0 < q1, "{} < {}", q0, q1);
    assert!(q1 < q20, "{} < {}", q1, q20);
    for q in [q0, q1, q20] {
        assert!((0.0..=1.0).contains(&q));
    }
}

#[tokio::test]
async fn test_components_in_unit_range() {
    let now = Utc::now();
    let pool = comedy_pool(now);
    let index = indexed(&pool).await;
    let ranker = HybridRanker::new(&EngineConfig::default());
    let ctx = context().with_seed_text("barista name cup");
    let query = HashingEmbedder::new().embed_text(&ctx.query_text());

    let pack = ranker.rank(&ctx, &pool, &WeightVector::default(), Some(&query), &index, 8, now);
    for entry in &pack.entries {
        let c = entry.components;
        for v in [c.semantic.unwrap_or(0.0), c.lexical, c.quality, c.freshness, entry.score] {
            assert!((0.0..=1.0).contains(&v), "{:?}", c);
        }
        assert!(!entry.degraded);
    }
}

#[tokio::test]
async fn test_missing_embedding_degrades_one_entry() {
    let now = Utc::now();
    let pool = comedy_pool(now);
    let index = indexed(&pool[..4]).await;
    let ranker = HybridRanker::new(&EngineConfig::default());
    let ctx = context();
    let query = HashingEmbedder::new().embed_text(&ctx.query_text());

    let pack = ranker.rank(&ctx, &pool, &WeightVector::default(), Some(&query), &index, 8, now);

    assert_eq!(pack.len(), 5);
    assert_eq!(pack.degraded_count, 1);
    let degraded: Vec<_> = pack.entries.iter().filter(|e| e.degraded).collect();
    assert_eq!(degraded[0].item_id, pool[4].id);
    assert!(degraded[0].components.semantic.is_none());
}

#[tokio::test]
async fn test_quality_heavy_weights_favor_rated_items() {
    let now = Utc::now();
    let pool = vec![
        item("fresh but unrated clip", now, 0, 0, 0.0),
        item("older but beloved clip", now, 40, 30, 5.0),
    ];
    let index = indexed(&pool).await;
    let ranker = HybridRanker::new(&EngineConfig::default());
    let ctx = context();

    let quality_only = WeightVector::new(0.0, 0.0, 1.0, 0.0);
    let pack = ranker.rank(&ctx, &pool, &quality_only, None, &index, 8, now);
    assert_eq!(pack.entries[0].item_id, pool[1].id);

    let fresh_only = WeightVector::new(0.0, 0.0, 0.0, 1.0);
    let pack = ranker.rank(&ctx, &pool, &fresh_only, None, &index, 8, now);
    assert_eq!(pack.entries[0].item_id, pool[0].id);
}

#[tokio::test]
async fn test_unnormalized_weights_are_renormalized() {
    let now = Utc::now();
    let pool = comedy_pool(now);
    let index = indexed(&pool).await;
    let ranker = HybridRanker::new(&EngineConfig::default());
    let ctx = context();

    let doubled = WeightVector::new(0.9, 0.5, 0.4, 0.2);
    let pack = ranker.rank(&ctx, &pool, &doubled, None, &index, 8, now);
    assert!((pack.weights.sum() - 1.0).abs() < 1e-9);

    let reference = ranker.rank(&ctx, &pool, &WeightVector::default(), None, &index, 8, now);
    assert_eq!(pack.item_ids(), reference.item_ids());
}

#[tokio::test]
async fn test_arm_weights_rank_full_pool() {
    let now = Utc::now();
    let pool = comedy_pool(now);
    let index = indexed(&pool).await;
    let ranker = HybridRanker::new(&EngineConfig::default());
    let ctx = RetrievalContext::new("mia", "comedy").with_seed_text("gym mirror");
    let query = HashingEmbedder::new().embed_text(&ctx.query_text());

    for arm in ArmId::ALL {
        let pack = ranker.rank(&ctx, &pool, &arm.arm().weights, Some(&query), &index, 3, now);
        assert_eq!(pack.len(), 3, "{}", arm);
        assert_eq!(pack.pool_size, 5);
    }
}
