//! Contextual bandit over ranking weights and generation temperatures
//!
//! `plan` picks the arm to trial for a bucket (epsilon-greedy over UCB);
//! feedback credits an arm and nudges the bucket's weights. Every write is
//! a compare-and-swap against the store, retried on a freshly read record.

use crate::config::LearnerConfig;
use crate::error::{CalliopeError, Result};
use crate::evaluation::RewardSignal;
use crate::policy::arms::{nearest_arm, ArmId};
use crate::policy::state::{AppliedReward, PolicyPhase, PolicyRecord};
use crate::policy::store::PolicyStore;
use crate::types::{BucketKey, RetrievalContext, TemperatureBand, WeightVector};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Policy for one generation round
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PolicyPlan {
    /// Learned weights the pack is ranked with
    pub weights: WeightVector,
    /// Arm trialed this round
    pub arm: ArmId,
    /// The arm's temperature band
    pub temperatures: TemperatureBand,
    pub phase: PolicyPhase,
    pub epsilon: f64,
    /// Arm was picked at random rather than by UCB
    pub explored: bool,
}

/// Result of one committed feedback update
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyUpdate {
    pub bucket: BucketKey,
    pub version: u64,
    pub applied: AppliedReward,
    pub weights: WeightVector,
    pub temperatures: TemperatureBand,
    pub epsilon: f64,
    /// Compare-and-swap attempts it took
    pub attempts: u32,
}

/// Per-bucket policy learner
pub struct PolicyLearner {
    store: Arc<dyn PolicyStore>,
    config: LearnerConfig,
    rng: Mutex<StdRng>,
}

impl PolicyLearner {
    pub fn new(store: Arc<dyn PolicyStore>, config: LearnerConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            store,
            config,
            rng: Mutex::new(rng),
        }
    }

    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    fn rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Current record of a bucket, the defaults if unseen
    pub fn current(&self, bucket: &BucketKey) -> Result<PolicyRecord> {
        Ok(self
            .store
            .load(bucket)?
            .unwrap_or_else(|| PolicyRecord::unseen(bucket.clone(), &self.config)))
    }

    /// Ranking weights for a context
    pub fn weights_for(&self, context: &RetrievalContext) -> Result<WeightVector> {
        Ok(self.current(&context.bucket())?.weights.normalized())
    }

    /// Choose the arm for the next generation round
    ///
    /// Read-only: an unseen bucket is planned from its defaults without
    /// creating a record.
    pub fn plan(&self, context: &RetrievalContext) -> Result<PolicyPlan> {
        let record = self.current(&context.bucket())?;

        let (arm, explored) = {
            let mut rng = self.rng();
            if rng.gen::<f64>() < record.epsilon {
                (ArmId::ALL[rng.gen_range(0..ArmId::ALL.len())], true)
            } else {
                (record.ucb_arm(self.config.ucb_exploration), false)
            }
        };

        debug!(
            "Planned arm {} for {} ({}, epsilon {:.3}, explored: {})",
            arm,
            record.bucket,
            record.phase,
            record.epsilon,
            explored
        );

        Ok(PolicyPlan {
            weights: record.weights.normalized(),
            arm,
            temperatures: arm.arm().temperatures,
            phase: record.phase,
            epsilon: record.epsilon,
            explored,
        })
    }

    /// Record a reward, crediting the arm nearest to the current weights
    pub fn record_feedback(
        &self,
        context: &RetrievalContext,
        reward: RewardSignal,
    ) -> Result<PolicyUpdate> {
        self.update(context.bucket(), None, reward)
    }

    /// Record a reward for the arm trialed in a round
    pub fn record_arm_feedback(
        &self,
        context: &RetrievalContext,
        arm: ArmId,
        reward: RewardSignal,
    ) -> Result<PolicyUpdate> {
        self.update(context.bucket(), Some(arm), reward)
    }

    /// All stored bucket records
    pub fn snapshot(&self) -> Result<Vec<PolicyRecord>> {
        self.store.list()
    }

    fn update(
        &self,
        bucket: BucketKey,
        arm: Option<ArmId>,
        reward: RewardSignal,
    ) -> Result<PolicyUpdate> {
        let max_attempts = self.config.max_update_retries.max(1);

        for attempt in 1..=max_attempts {
            let stored = self.store.load(&bucket)?;
            let expected = stored.as_ref().map(|r| r.version);
            let mut record =
                stored.unwrap_or_else(|| PolicyRecord::unseen(bucket.clone(), &self.config));

            let credited = arm.unwrap_or_else(|| nearest_arm(&record.weights));
            let applied = {
                let mut rng = self.rng();
                record.apply_reward(credited, &reward, &self.config, &mut *rng, Utc::now())
            };
            record.version = expected.map_or(1, |v| v + 1);

            let update = PolicyUpdate {
                bucket: bucket.clone(),
                version: record.version,
                applied,
                weights: record.weights,
                temperatures: record.temperatures,
                epsilon: record.epsilon,
                attempts: attempt,
            };

            if self.store.compare_and_swap(expected, record)? {
                if applied.phase_before != applied.phase_after {
                    info!(
                        "Bucket {} moved {} -> {} after {} updates",
                        bucket, applied.phase_before, applied.phase_after, update.version
                    );
                }
                debug!(
                    "Credited {} on {} with reward {:.3} (delta {:.4}, explored: {})",
                    credited, bucket, applied.effective_reward, applied.weight_delta, applied.explored
                );
                return Ok(update);
            }

            debug!(
                "Policy write conflict on {} (attempt {}/{}), retrying",
                bucket, attempt, max_attempts
            );
            std::thread::yield_now();
        }

        warn!(
            "Giving up on policy update for {} after {} attempts",
            bucket, max_attempts
        );
        Err(CalliopeError::BanditUpdateConflict {
            bucket: bucket.to_string(),
            attempts: max_attempts,
        })
    }
}
