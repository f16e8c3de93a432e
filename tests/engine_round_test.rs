//! End-to-end tests of the exemplar engine
//!
//! Drives full generation rounds with stub judges and generators:
//! - Approved candidates reward the planned arm
//! - Copied output is flagged and earns no reward
//! - Judge outages and timeouts degrade to unscored candidates
//! - Generation failures reach the caller
//! - Human ratings blend with auto-scores

mod common;

use calliope_core::{
    evaluation::{ApprovalDecision, ReviewReason, RewardSource},
    policy::{ArmId, PolicyPhase},
    types::{GeneratedCandidate, QualitySignal},
    CalliopeError, EmbeddingService, ExemplarEngine, HashingEmbedder, InMemoryAutoScoreLog, Judge,
};
use chrono::Utc;
use common::{
    comedy_pool, context, item, judge_json, test_config, ContendedPolicyStore, CopyingGenerator,
    FailingGenerator, ScriptedJudge, SlowJudge, StubGenerator, StubJudge, UnavailableJudge,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const NOVEL_TEXTS: [&str; 2] = [
    "my dog reviewing every delivery driver like a food critic",
    "pov your smart fridge starts leaving passive aggressive notes",
];

async fn engine_with(judge: Arc<dyn Judge>) -> (ExemplarEngine, Vec<calliope_core::ReferenceItem>) {
    let engine = ExemplarEngine::in_memory(test_config(), judge);
    let pool = comedy_pool(Utc::now());
    engine.index_pool(&pool).await.expect("indexing");
    (engine, pool)
}

#[tokio::test]
async fn test_round_rewards_approved_candidates() {
    let judge = Arc::new(StubJudge::approving());
    let (engine, pool) = engine_with(judge.clone()).await;
    let ctx = context();

    let report = engine
        .run_round(&ctx, &pool, &StubGenerator::new(&NOVEL_TEXTS))
        .await
        .expect("round");

    assert_eq!(report.candidates.len(), 6);
    assert_eq!(judge.calls(), 6);
    assert_eq!(report.pack.arm, Some(report.plan.arm));
    assert_eq!(report.pack.temperatures, report.plan.temperatures);
    assert!(!report.pack.is_empty());
    assert!(!report.pack.is_degraded());

    let band = report.plan.temperatures;
    let temperatures: Vec<f64> = report.candidates.iter().map(|c| c.temperature).collect();
    assert_eq!(
        temperatures,
        vec![band.low, band.low, band.mid, band.mid, band.high, band.high]
    );

    for candidate in &report.candidates {
        assert_eq!(candidate.approval, ApprovalDecision::AutoApproved);
        assert!(!candidate.copy_check.as_ref().expect("checked").needs_rewrite());
        let reward = candidate.reward.expect("rewarded");
        assert_eq!(reward.source, RewardSource::Auto);
        assert!(candidate.policy_version.is_some());
    }
    assert_eq!(report.approved().count(), 6);

    let record = engine.learner().current(&ctx.bucket()).unwrap();
    assert_eq!(record.update_count, 6);
    assert_eq!(record.stats(report.plan.arm).pulls, 6);
    assert_eq!(record.phase, PolicyPhase::Exploring);
}

#[tokio::test]
async fn test_copied_candidates_are_flagged_and_not_rewarded() {
    let judge = Arc::new(StubJudge::approving());
    let (engine, pool) = engine_with(judge.clone()).await;
    let ctx = context();

    let report = engine
        .run_round(&ctx, &pool, &CopyingGenerator)
        .await
        .expect("round");

    assert_eq!(report.candidates.len(), 3);
    for candidate in &report.candidates {
        assert!(candidate.copy_check.as_ref().expect("checked").needs_rewrite());
        assert_eq!(
            candidate.approval,
            ApprovalDecision::NeedsHumanReview(ReviewReason::CopyFlagged)
        );
        assert!(candidate.score.is_some());
        assert!(candidate.reward.is_none());
        assert!(candidate.policy_version.is_none());
    }
    assert_eq!(report.approved().count(), 0);
    assert!(engine.learner().snapshot().unwrap().is_empty());
}

#[tokio::test]
async fn test_judge_outage_leaves_candidates_unscored() {
    let judge = Arc::new(UnavailableJudge::new());
    let (engine, pool) = engine_with(judge.clone()).await;
    let ctx = context();

    let report = engine
        .run_round(&ctx, &pool, &StubGenerator::new(&NOVEL_TEXTS[..1]))
        .await
        .expect("round completes without a judge");

    assert_eq!(report.candidates.len(), 3);
    for candidate in &report.candidates {
        assert!(candidate.score.is_none());
        let error = candidate.score_error.as_deref().expect("error recorded");
        assert!(error.contains("Judge unavailable"), "{}", error);
        assert_eq!(
            candidate.approval,
            ApprovalDecision::NeedsHumanReview(ReviewReason::Unscored)
        );
        assert!(candidate.reward.is_none());
    }

    // One call plus two retries per candidate
    let max_retries = engine.config().scoring.judge_max_retries as usize;
    assert_eq!(judge.calls.load(Ordering::SeqCst), 3 * (1 + max_retries));
    assert!(engine.learner().snapshot().unwrap().is_empty());
}

#[tokio::test]
async fn test_slow_judge_times_out() {
    let judge = Arc::new(SlowJudge {
        delay: Duration::from_millis(500),
        calls: AtomicUsize::new(0),
    });
    let (engine, pool) = engine_with(judge.clone()).await;
    let ctx = context();

    let report = engine
        .run_round(&ctx, &pool, &StubGenerator::new(&NOVEL_TEXTS[..1]))
        .await
        .expect("round");

    for candidate in &report.candidates {
        let error = candidate.score_error.as_deref().expect("timed out");
        assert!(error.contains("timed out after 100ms"), "{}", error);
        assert!(!candidate.approval.is_approved());
    }
    assert_eq!(judge.calls.load(Ordering::SeqCst), 3 * 3);
}

#[tokio::test]
async fn test_malformed_judge_output_is_not_retried() {
    let judge = Arc::new(StubJudge::new("I think it is pretty funny, maybe a 7/10"));
    let (engine, pool) = engine_with(judge.clone()).await;

    let report = engine
        .run_round(&context(), &pool, &StubGenerator::new(&NOVEL_TEXTS[..1]))
        .await
        .expect("round");

    assert_eq!(judge.calls(), 3);
    for candidate in &report.candidates {
        assert!(candidate.score_error.is_some());
        assert_eq!(
            candidate.approval,
            ApprovalDecision::NeedsHumanReview(ReviewReason::Unscored)
        );
    }
}

#[tokio::test]
async fn test_low_confidence_scores_skip_learning() {
    let judge = Arc::new(StubJudge::new(judge_json(0.95, 0.95, 0.4)));
    let (engine, pool) = engine_with(judge).await;
    let ctx = context();

    let report = engine
        .run_round(&ctx, &pool, &StubGenerator::new(&NOVEL_TEXTS))
        .await
        .expect("round");

    for candidate in &report.candidates {
        assert!(candidate.score.is_some());
        assert_eq!(
            candidate.approval,
            ApprovalDecision::NeedsHumanReview(ReviewReason::LowConfidence)
        );
        assert!(candidate.reward.is_none());
    }
    assert!(engine.learner().snapshot().unwrap().is_empty());
}

#[tokio::test]
async fn test_unsafe_scores_need_review_but_still_teach() {
    let judge = Arc::new(StubJudge::new(judge_json(0.9, 0.3, 0.9)));
    let (engine, pool) = engine_with(judge).await;
    let ctx = context();

    let report = engine
        .run_round(&ctx, &pool, &StubGenerator::new(&NOVEL_TEXTS[..1]))
        .await
        .expect("round");

    for candidate in &report.candidates {
        assert_eq!(
            candidate.approval,
            ApprovalDecision::NeedsHumanReview(ReviewReason::LowSafety)
        );
        assert!(candidate.reward.is_some());
    }
    assert_eq!(engine.learner().current(&ctx.bucket()).unwrap().update_count, 3);
}

#[tokio::test]
async fn test_generation_failure_propagates() {
    let judge = Arc::new(StubJudge::approving());
    let (engine, pool) = engine_with(judge.clone()).await;

    let result = engine.run_round(&context(), &pool, &FailingGenerator).await;

    assert!(matches!(result, Err(CalliopeError::Generation(_))));
    assert_eq!(judge.calls(), 0);
}

#[tokio::test]
async fn test_retrieve_degrades_without_index() {
    let engine = ExemplarEngine::in_memory(test_config(), Arc::new(StubJudge::approving()));
    let pool = comedy_pool(Utc::now());

    let pack = engine.retrieve(&context(), &pool, Some(3)).await;

    assert_eq!(pack.len(), 3);
    assert_eq!(pack.degraded_count, 3);
    assert!(pack.entries.iter().all(|e| e.components.semantic.is_none()));
}

#[tokio::test]
async fn test_retrieve_orders_quality_by_rating_volume() {
    let engine = ExemplarEngine::in_memory(test_config(), Arc::new(StubJudge::approving()));
    let now = Utc::now();
    let pool = vec![
        item("a brand new sketch nobody rated yet", now, 2, 0, 0.0),
        item("one fan loved this sketch about ferries", now, 2, 1, 5.0),
        item("crowd favorite sketch about airport security", now, 2, 20, 5.0),
    ];
    engine.index_pool(&pool).await.expect("indexing");

    let pack = engine.retrieve(&context(), &pool, None).await;
    let quality: Vec<f64> = pool
        .iter()
        .map(|item| {
            pack.entries
                .iter()
                .find(|e| e.item_id == item.id)
                .expect("ranked")
                .components
                .quality
        })
        .collect();

    assert!(quality[0] < quality[1]);
    assert!(quality[1] < quality[2]);
    assert!((quality[0] - 0.84).abs() < 1e-9);
}

#[tokio::test]
async fn test_retrieve_uses_learned_weights() {
    let engine = ExemplarEngine::in_memory(test_config(), Arc::new(StubJudge::approving()));
    let pool = comedy_pool(Utc::now());
    engine.index_pool(&pool).await.expect("indexing");
    let ctx = context();

    let before = engine.retrieve(&ctx, &pool, None).await;
    assert_eq!(before.weights, calliope_core::WeightVector::GLOBAL_DEFAULT);

    let mut signal = QualitySignal::default();
    engine
        .record_rating(&ctx, &mut signal, 5.0, Some(ArmId::SemanticHeavy), None)
        .expect("rating recorded");

    let learned = engine.learner().weights_for(&ctx).unwrap();
    let after = engine.retrieve(&ctx, &pool, None).await;
    assert_eq!(after.weights, learned);
}

#[tokio::test]
async fn test_record_rating_blends_with_auto_score() {
    let engine = ExemplarEngine::in_memory(test_config(), Arc::new(StubJudge::approving()));
    let ctx = context();
    let candidate = GeneratedCandidate::new(NOVEL_TEXTS[0]);
    let auto = engine
        .score_candidate(&candidate, &ctx)
        .await
        .expect("scored");

    let mut signal = QualitySignal::default();
    let update = engine
        .record_rating(&ctx, &mut signal, 4.0, Some(ArmId::Creative), Some(&auto))
        .expect("recorded")
        .expect("update");

    assert_eq!(signal.rating_count, 1);
    assert_eq!(update.applied.arm, ArmId::Creative);
    assert_eq!(update.version, 1);

    // Human reward alone: 0.8 at confidence 1/3; auto confidence 0.9 wins
    let auto_reward = engine.scorer().reward(&auto).expect("confident");
    let expected_value =
        ((1.0 / 3.0) * 0.8 + auto_reward.confidence * auto_reward.value) / (1.0 / 3.0 + 0.9);
    let expected_effective = 0.9 * expected_value + 0.1 * 0.5;
    assert!((update.applied.effective_reward - expected_effective).abs() < 1e-9);
}

#[tokio::test]
async fn test_record_rating_rejects_out_of_scale() {
    let engine = ExemplarEngine::in_memory(test_config(), Arc::new(StubJudge::approving()));
    let mut signal = QualitySignal::uniform(2, 4.0);

    let result = engine.record_rating(&context(), &mut signal, 9.0, None, None);

    assert!(matches!(result, Err(CalliopeError::InvalidInput(_))));
    assert_eq!(signal, QualitySignal::uniform(2, 4.0));
    assert!(engine.learner().snapshot().unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_rating_leaves_signal_untouched() {
    let store = Arc::new(ContendedPolicyStore::new());
    let engine = ExemplarEngine::new(
        test_config(),
        Arc::new(HashingEmbedder::new()),
        Arc::new(StubJudge::approving()),
        store.clone(),
        Arc::new(InMemoryAutoScoreLog::new()),
    );
    let ctx = context();
    let mut signal = QualitySignal::default();

    for _ in 0..3 {
        let result = engine.record_rating(&ctx, &mut signal, 5.0, Some(ArmId::Creative), None);
        assert!(matches!(
            result,
            Err(CalliopeError::BanditUpdateConflict { .. })
        ));
        assert_eq!(signal, QualitySignal::default());
    }
    assert_eq!(
        store.swaps.load(Ordering::SeqCst),
        3 * test_config().learner.max_update_retries as usize
    );
}

#[tokio::test]
async fn test_round_orders_candidates_by_composite() {
    let judge = ScriptedJudge::new(
        &[
            ("smart fridge", judge_json(0.95, 0.95, 0.9)),
            ("delivery driver", judge_json(0.82, 0.9, 0.9)),
        ],
        "no scores today",
    );
    let (engine, pool) = engine_with(Arc::new(judge)).await;
    let generator = StubGenerator::new(&[
        "a sketch the judge cannot parse about laundry day",
        NOVEL_TEXTS[0],
        NOVEL_TEXTS[1],
    ]);

    let report = engine
        .run_round(&context(), &pool, &generator)
        .await
        .expect("round");

    let texts: Vec<&str> = report
        .candidates
        .iter()
        .map(|c| c.candidate.text.as_str())
        .collect();
    assert_eq!(&texts[0..3], &[NOVEL_TEXTS[1]; 3]);
    assert_eq!(&texts[3..6], &[NOVEL_TEXTS[0]; 3]);
    assert!(texts[6..].iter().all(|t| t.contains("laundry")));
    assert!(report.candidates[6..].iter().all(|c| c.composite.is_none()));

    // Equal composites keep generation order
    let band = report.plan.temperatures;
    let top_temps: Vec<f64> = report.candidates[0..3].iter().map(|c| c.temperature).collect();
    assert_eq!(top_temps, vec![band.low, band.mid, band.high]);

    let best = report.best().expect("best candidate");
    assert_eq!(best.candidate.text, NOVEL_TEXTS[1]);
    assert!(best.composite > report.candidates[3].composite);
}

#[tokio::test]
async fn test_round_without_clean_scores_has_no_best() {
    let (engine, pool) = engine_with(Arc::new(StubJudge::approving())).await;

    let report = engine
        .run_round(&context(), &pool, &CopyingGenerator)
        .await
        .expect("round");

    assert!(report.candidates.iter().all(|c| c.copy_flagged()));
    assert!(report.best().is_none());
}

#[tokio::test]
async fn test_engine_builds_configured_embedder() {
    let mut config = test_config();
    config.embedder.dimensions = Some(128);

    let engine = ExemplarEngine::from_config(config, Arc::new(StubJudge::approving()))
        .await
        .expect("engine");

    assert_eq!(engine.embedder().model_name(), "hashing-ngram");
    assert_eq!(engine.embedder().dimensions(), 128);
    let pool = comedy_pool(Utc::now());
    assert_eq!(engine.index_pool(&pool).await.expect("indexing"), pool.len());
}
