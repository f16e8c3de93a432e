//! Exemplar engine
//!
//! Wires the embedding index, ranker, copy guard, auto-scorer and policy
//! learner together and runs the closed generation loop:
//! plan → retrieve → generate → check copy → score → reward → learn.
//!
//! Retrieval never fails. Judge and store failures only cost the learning
//! step of the candidate they hit; the round itself carries on.

use crate::config::EngineConfig;
use crate::embeddings::{self, EmbeddingIndex, EmbeddingService, HashingEmbedder};
use crate::error::Result;
use crate::evaluation::{
    weighted_reward, ApprovalDecision, AutoScore, AutoScorer, Judge, ReviewReason, RewardSignal,
};
use crate::policy::{ArmId, InMemoryPolicyStore, PolicyLearner, PolicyPlan, PolicyStore, PolicyUpdate};
use crate::retrieval::{CopyCheck, CopyGuard, ExemplarPack, HybridRanker};
use crate::services::Generator;
use crate::storage::{AutoScoreLog, InMemoryAutoScoreLog};
use crate::types::{
    BucketKey, GeneratedCandidate, QualitySignal, ReferenceItem, RetrievalContext, WeightVector,
};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// What happened to one generated candidate
#[derive(Debug, Clone, Serialize)]
pub struct CandidateReport {
    pub candidate: GeneratedCandidate,
    pub temperature: f64,
    /// `None` when the copy check itself failed
    pub copy_check: Option<CopyCheck>,
    pub score: Option<AutoScore>,
    /// Weighted judge score used to order the round, `None` when unscored
    pub composite: Option<f64>,
    pub score_error: Option<String>,
    pub approval: ApprovalDecision,
    pub reward: Option<RewardSignal>,
    /// Policy version written by this candidate's reward
    pub policy_version: Option<u64>,
}

impl CandidateReport {
    pub fn copy_flagged(&self) -> bool {
        self.copy_check.as_ref().is_some_and(CopyCheck::needs_rewrite)
    }
}

/// Outcome of one generation round
#[derive(Debug, Clone, Serialize)]
pub struct RoundReport {
    pub bucket: BucketKey,
    pub plan: PolicyPlan,
    pub pack: ExemplarPack,
    /// Best first: clean before copy-flagged, then composite descending,
    /// unscored last, generation order among equals
    pub candidates: Vec<CandidateReport>,
}

impl RoundReport {
    pub fn approved(&self) -> impl Iterator<Item = &CandidateReport> {
        self.candidates.iter().filter(|c| c.approval.is_approved())
    }

    /// Highest-scoring candidate that was not flagged as a copy
    pub fn best(&self) -> Option<&CandidateReport> {
        self.candidates
            .first()
            .filter(|c| !c.copy_flagged() && c.composite.is_some())
    }
}

fn rerank(candidates: &mut [CandidateReport]) {
    candidates.sort_by(|a, b| {
        a.copy_flagged()
            .cmp(&b.copy_flagged())
            .then_with(|| match (a.composite, b.composite) {
                (Some(x), Some(y)) => y.total_cmp(&x),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
    });
}

/// Hybrid retrieval and policy learning engine
pub struct ExemplarEngine {
    config: EngineConfig,
    embedder: Arc<dyn EmbeddingService>,
    index: Arc<EmbeddingIndex>,
    ranker: HybridRanker,
    guard: CopyGuard,
    scorer: AutoScorer,
    learner: PolicyLearner,
}

impl ExemplarEngine {
    pub fn new(
        config: EngineConfig,
        embedder: Arc<dyn EmbeddingService>,
        judge: Arc<dyn Judge>,
        policy_store: Arc<dyn PolicyStore>,
        score_log: Arc<dyn AutoScoreLog>,
    ) -> Self {
        Self {
            ranker: HybridRanker::new(&config),
            guard: CopyGuard::new(config.copy_guard.clone()),
            scorer: AutoScorer::new(judge, score_log, config.scoring.clone()),
            learner: PolicyLearner::new(policy_store, config.learner.clone()),
            index: Arc::new(EmbeddingIndex::new()),
            embedder,
            config,
        }
    }

    /// Configured embedder and in-memory stores
    pub async fn from_config(config: EngineConfig, judge: Arc<dyn Judge>) -> Result<Self> {
        let embedder = embeddings::from_config(&config.embedder).await?;
        Ok(Self::new(
            config,
            embedder,
            judge,
            Arc::new(InMemoryPolicyStore::new()),
            Arc::new(InMemoryAutoScoreLog::new()),
        ))
    }

    /// Hashing embedder and in-memory stores
    pub fn in_memory(config: EngineConfig, judge: Arc<dyn Judge>) -> Self {
        Self::new(
            config,
            Arc::new(HashingEmbedder::new()),
            judge,
            Arc::new(InMemoryPolicyStore::new()),
            Arc::new(InMemoryAutoScoreLog::new()),
        )
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn embedder(&self) -> &dyn EmbeddingService {
        self.embedder.as_ref()
    }

    pub fn index(&self) -> &EmbeddingIndex {
        &self.index
    }

    pub fn learner(&self) -> &PolicyLearner {
        &self.learner
    }

    pub fn scorer(&self) -> &AutoScorer {
        &self.scorer
    }

    /// Compute embeddings missing for the pool's fragments
    pub async fn index_pool(&self, pool: &[ReferenceItem]) -> Result<usize> {
        self.index.refresh_items(pool, self.embedder.as_ref()).await
    }

    /// Rank `pool` for `context` with the bucket's learned weights
    ///
    /// `k` defaults to the configured pack size.
    pub async fn retrieve(
        &self,
        context: &RetrievalContext,
        pool: &[ReferenceItem],
        k: Option<usize>,
    ) -> ExemplarPack {
        let weights = match self.learner.weights_for(context) {
            Ok(weights) => weights,
            Err(e) => {
                warn!(
                    "Policy lookup failed for {}, using defaults: {}",
                    context.bucket(),
                    e
                );
                WeightVector::GLOBAL_DEFAULT
            }
        };
        self.retrieve_with_weights(context, pool, &weights, k).await
    }

    async fn retrieve_with_weights(
        &self,
        context: &RetrievalContext,
        pool: &[ReferenceItem],
        weights: &WeightVector,
        k: Option<usize>,
    ) -> ExemplarPack {
        let query_embedding = if pool.is_empty() {
            None
        } else {
            match self.embedder.embed(&context.query_text()).await {
                Ok(embedding) => Some(embedding),
                Err(e) => {
                    warn!("Query embedding failed, ranking without semantics: {}", e);
                    None
                }
            }
        };

        self.ranker.rank(
            context,
            pool,
            weights,
            query_embedding.as_deref(),
            &self.index,
            k.unwrap_or_else(|| self.ranker.default_pack_size()),
            Utc::now(),
        )
    }

    /// Check a candidate and its fragments against the pack it was generated from
    pub async fn check_copy(
        &self,
        candidate: &GeneratedCandidate,
        pack: &ExemplarPack,
    ) -> Result<CopyCheck> {
        self.guard
            .check_candidate(candidate, pack, self.embedder.as_ref())
            .await
    }

    /// Judge a candidate
    pub async fn score_candidate(
        &self,
        candidate: &GeneratedCandidate,
        context: &RetrievalContext,
    ) -> Result<AutoScore> {
        self.scorer.score(candidate, context).await
    }

    /// Feed a reward to the bucket's learner
    pub fn record_feedback(
        &self,
        context: &RetrievalContext,
        reward: RewardSignal,
    ) -> Result<PolicyUpdate> {
        self.learner.record_feedback(context, reward)
    }

    /// Record a human rating of generated content
    ///
    /// The resulting human reward, blended with the auto-score's reward
    /// when one is given, is credited to `arm` (or the arm nearest the
    /// current weights). The rating is folded into `signal` only once the
    /// policy update has been stored, so a failed call can be retried.
    pub fn record_rating(
        &self,
        context: &RetrievalContext,
        signal: &mut QualitySignal,
        rating: f64,
        arm: Option<ArmId>,
        auto_score: Option<&AutoScore>,
    ) -> Result<Option<PolicyUpdate>> {
        let mut updated = *signal;
        updated.record(rating)?;

        let Some(human) = RewardSignal::from_human(
            &updated,
            self.config.normalization.rating_scale_max,
            self.config.scoring.human_ratings_for_full_confidence,
        ) else {
            *signal = updated;
            return Ok(None);
        };

        let reward = match auto_score.and_then(|s| self.scorer.reward(s)) {
            Some(auto) => RewardSignal::blend(&human, &auto),
            None => human,
        };

        let update = match arm {
            Some(arm) => self.learner.record_arm_feedback(context, arm, reward)?,
            None => self.learner.record_feedback(context, reward)?,
        };
        *signal = updated;
        Ok(Some(update))
    }

    /// Run one closed generation round
    ///
    /// Generation failures are returned to the caller. Everything after
    /// generation degrades per candidate.
    pub async fn run_round(
        &self,
        context: &RetrievalContext,
        pool: &[ReferenceItem],
        generator: &dyn Generator,
    ) -> Result<RoundReport> {
        let plan = self.learner.plan(context)?;

        let mut pack = self
            .retrieve_with_weights(context, pool, &plan.weights, None)
            .await;
        pack.arm = Some(plan.arm);
        pack.temperatures = plan.temperatures;

        let band = plan.temperatures;
        let mut generated = Vec::new();
        for temperature in [band.low, band.mid, band.high] {
            for candidate in generator.generate(&pack, context, temperature).await? {
                generated.push((candidate, temperature));
            }
        }

        let mut candidates = Vec::with_capacity(generated.len());
        for (candidate, temperature) in generated {
            candidates.push(
                self.evaluate_candidate(context, &plan, &pack, candidate, temperature)
                    .await,
            );
        }

        rerank(&mut candidates);

        let report = RoundReport {
            bucket: context.bucket(),
            plan,
            pack,
            candidates,
        };
        info!(
            "Round for {} with arm {}: {} candidates, {} auto-approved",
            report.bucket,
            plan.arm,
            report.candidates.len(),
            report.approved().count()
        );
        Ok(report)
    }

    async fn evaluate_candidate(
        &self,
        context: &RetrievalContext,
        plan: &PolicyPlan,
        pack: &ExemplarPack,
        candidate: GeneratedCandidate,
        temperature: f64,
    ) -> CandidateReport {
        let copy_check = match self.check_copy(&candidate, pack).await {
            Ok(check) => Some(check),
            Err(e) => {
                warn!("Copy check failed for candidate {}: {}", candidate.id, e);
                None
            }
        };
        let copied = copy_check.as_ref().is_some_and(CopyCheck::needs_rewrite);

        let (score, score_error) = match self.score_candidate(&candidate, context).await {
            Ok(score) => (Some(score), None),
            Err(e) => (None, Some(e.to_string())),
        };

        let composite = score
            .as_ref()
            .map(|s| weighted_reward(&s.scores, &self.scorer.config().reward_weights));

        let approval = if copied {
            ApprovalDecision::NeedsHumanReview(ReviewReason::CopyFlagged)
        } else {
            self.scorer.approval(score.as_ref())
        };

        // Copied output is not rewarded
        let reward = if copied {
            None
        } else {
            score.as_ref().and_then(|s| self.scorer.reward(s))
        };

        let policy_version = match reward {
            Some(reward) => match self.learner.record_arm_feedback(context, plan.arm, reward) {
                Ok(update) => Some(update.version),
                Err(e) => {
                    warn!("Skipping policy update for candidate {}: {}", candidate.id, e);
                    None
                }
            },
            None => None,
        };

        CandidateReport {
            candidate,
            temperature,
            copy_check,
            score,
            composite,
            score_error,
            approval,
            reward,
            policy_version,
        }
    }
}
