//! Per-bucket policy state machine
//!
//! `Unseen → Exploring → Converging → Stable`, with `Stable` dropping back
//! to `Converging` when weight deltas grow again. A record is created with
//! the global defaults on a bucket's first observation and is only mutated
//! through [`PolicyRecord::apply_reward`].

use crate::config::LearnerConfig;
use crate::evaluation::RewardSignal;
use crate::policy::arms::ArmId;
use crate::types::{BucketKey, TemperatureBand, WeightVector};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

/// Initial EMA of effective reward
const INITIAL_SUCCESS_RATE: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyPhase {
    Unseen,
    Exploring,
    Converging,
    Stable,
}

impl std::fmt::Display for PolicyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PolicyPhase::Unseen => "unseen",
            PolicyPhase::Exploring => "exploring",
            PolicyPhase::Converging => "converging",
            PolicyPhase::Stable => "stable",
        };
        f.write_str(name)
    }
}

/// Pull count and accumulated effective reward of one arm
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ArmStats {
    pub pulls: u64,
    pub reward_sum: f64,
}

impl ArmStats {
    pub fn mean(&self) -> Option<f64> {
        if self.pulls == 0 {
            None
        } else {
            Some(self.reward_sum / self.pulls as f64)
        }
    }
}

/// Learned policy of one bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub bucket: BucketKey,
    /// Optimistic concurrency version, 0 for a never-stored record
    pub version: u64,
    pub weights: WeightVector,
    pub temperatures: TemperatureBand,
    pub phase: PolicyPhase,
    pub epsilon: f64,
    pub update_count: u64,
    /// EMA of effective reward
    pub success_rate: f64,
    pub arm_stats: BTreeMap<ArmId, ArmStats>,
    pub recent_deltas: VecDeque<f64>,
    pub updated_at: DateTime<Utc>,
}

/// What one reward did to a record
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AppliedReward {
    pub arm: ArmId,
    pub effective_reward: f64,
    pub explored: bool,
    /// Arm perturbed toward on an exploration step
    pub explored_toward: Option<ArmId>,
    pub weight_delta: f64,
    pub phase_before: PolicyPhase,
    pub phase_after: PolicyPhase,
}

impl PolicyRecord {
    /// Fresh record resolving to the global defaults
    pub fn unseen(bucket: BucketKey, config: &LearnerConfig) -> Self {
        Self {
            bucket,
            version: 0,
            weights: WeightVector::GLOBAL_DEFAULT,
            temperatures: TemperatureBand::GLOBAL_DEFAULT,
            phase: PolicyPhase::Unseen,
            epsilon: config.epsilon_initial,
            update_count: 0,
            success_rate: INITIAL_SUCCESS_RATE,
            arm_stats: ArmId::ALL
                .into_iter()
                .map(|id| (id, ArmStats::default()))
                .collect(),
            recent_deltas: VecDeque::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn stats(&self, arm: ArmId) -> ArmStats {
        self.arm_stats.get(&arm).copied().unwrap_or_default()
    }

    pub fn total_pulls(&self) -> u64 {
        self.arm_stats.values().map(|s| s.pulls).sum()
    }

    /// Pull-weighted mean effective reward across all arms
    pub fn running_mean(&self) -> Option<f64> {
        let pulls = self.total_pulls();
        if pulls == 0 {
            return None;
        }
        let sum: f64 = self.arm_stats.values().map(|s| s.reward_sum).sum();
        Some(sum / pulls as f64)
    }

    /// Upper-confidence-bound arm; unplayed arms first in `ArmId::ALL` order
    pub fn ucb_arm(&self, exploration: f64) -> ArmId {
        if let Some(unplayed) = ArmId::ALL.into_iter().find(|id| self.stats(*id).pulls == 0) {
            return unplayed;
        }

        let ln_total = (self.total_pulls() as f64).ln();
        let mut best = ArmId::Balanced;
        let mut best_score = f64::NEG_INFINITY;
        for id in ArmId::ALL {
            let stats = self.stats(id);
            let mean = stats.mean().unwrap_or(0.0);
            let score = mean + exploration * (ln_total / stats.pulls as f64).sqrt();
            if score > best_score {
                best = id;
                best_score = score;
            }
        }
        best
    }

    /// Advantage-weighted centroid of the arms beating the running mean
    ///
    /// `None` when no arm beats it.
    pub fn exploitation_target(&self) -> Option<(WeightVector, TemperatureBand)> {
        let running = self.running_mean()?;

        let mut total = 0.0;
        let mut weights = [0.0; 4];
        let mut temps = [0.0; 3];
        for id in ArmId::ALL {
            let Some(mean) = self.stats(id).mean() else {
                continue;
            };
            let advantage = mean - running;
            if advantage <= 0.0 {
                continue;
            }
            let arm = id.arm();
            for (acc, w) in weights.iter_mut().zip(arm.weights.as_array()) {
                *acc += advantage * w;
            }
            let band = [
                arm.temperatures.low,
                arm.temperatures.mid,
                arm.temperatures.high,
            ];
            for (acc, t) in temps.iter_mut().zip(band) {
                *acc += advantage * t;
            }
            total += advantage;
        }

        if total <= f64::EPSILON {
            return None;
        }
        Some((
            WeightVector::new(
                weights[0] / total,
                weights[1] / total,
                weights[2] / total,
                weights[3] / total,
            ),
            TemperatureBand::new(temps[0] / total, temps[1] / total, temps[2] / total),
        ))
    }

    /// Fold one reward observation for `arm` into the record
    pub fn apply_reward<R: Rng + ?Sized>(
        &mut self,
        arm: ArmId,
        reward: &RewardSignal,
        config: &LearnerConfig,
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> AppliedReward {
        let phase_before = self.phase;

        let c = reward.confidence.clamp(0.0, 1.0);
        let effective_reward = (c * reward.value + (1.0 - c) * self.success_rate).clamp(0.0, 1.0);

        let stats = self.arm_stats.entry(arm).or_default();
        stats.pulls += 1;
        stats.reward_sum += effective_reward;

        self.success_rate = (1.0 - config.learning_rate) * self.success_rate
            + config.learning_rate * effective_reward;

        let explored = rng.gen::<f64>() < self.epsilon;
        let (explored_toward, target, step) = if explored {
            let toward = ArmId::ALL[rng.gen_range(0..ArmId::ALL.len())];
            let arm = toward.arm();
            (
                Some(toward),
                Some((arm.weights, arm.temperatures)),
                config.perturbation_step,
            )
        } else {
            (None, self.exploitation_target(), config.learning_rate)
        };

        let before = self.weights;
        if let Some((target_weights, target_temps)) = target {
            self.weights = self.weights.blend_toward(&target_weights, step);
            self.temperatures = self.temperatures.blend_toward(&target_temps, step);
        }
        let weight_delta = before.l1_distance(&self.weights);

        self.recent_deltas.push_back(weight_delta);
        while self.recent_deltas.len() > config.stability_window.max(1) {
            self.recent_deltas.pop_front();
        }

        self.advance_phase(config);
        self.updated_at = now;

        AppliedReward {
            arm,
            effective_reward,
            explored,
            explored_toward,
            weight_delta,
            phase_before,
            phase_after: self.phase,
        }
    }

    fn advance_phase(&mut self, config: &LearnerConfig) {
        self.update_count += 1;

        if self.phase == PolicyPhase::Unseen {
            self.phase = PolicyPhase::Exploring;
            self.epsilon = config.epsilon_initial;
        }

        match self.phase {
            PolicyPhase::Exploring => {
                if self.update_count >= config.exploring_updates {
                    self.phase = PolicyPhase::Converging;
                }
            }
            PolicyPhase::Converging | PolicyPhase::Stable => {
                self.epsilon = (self.epsilon * config.epsilon_decay).max(config.epsilon_min);
                if self.deltas_stable(config) {
                    self.phase = PolicyPhase::Stable;
                    // Stable buckets explore at the floor only
                    self.epsilon = config.epsilon_min;
                } else {
                    self.phase = PolicyPhase::Converging;
                }
            }
            PolicyPhase::Unseen => {}
        }
    }

    fn deltas_stable(&self, config: &LearnerConfig) -> bool {
        let window = config.stability_window.max(1);
        if self.recent_deltas.len() < window {
            return false;
        }
        let n = self.recent_deltas.len() as f64;
        let mean = self.recent_deltas.iter().sum::<f64>() / n;
        let variance = self
            .recent_deltas
            .iter()
            .map(|d| (d - mean) * (d - mean))
            .sum::<f64>()
            / n;
        variance < config.stability_variance && mean < config.stability_delta
    }
}
