//! Reward signals fed to the policy learner
//!
//! A reward is a value in [0,1] paired with a confidence in [0,1]. It comes
//! from an auto-score, from accumulated human ratings, or from a blend of the
//! two weighted by their confidences.

use crate::config::{RewardWeights, ScoringConfig};
use crate::evaluation::auto_scorer::{AutoScore, DimensionScores};
use crate::types::QualitySignal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardSource {
    Auto,
    Human,
    Blended,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardSignal {
    pub value: f64,
    pub confidence: f64,
    pub source: RewardSource,
}

impl RewardSignal {
    /// Build a signal, clamping both fields into [0,1]
    pub fn new(value: f64, confidence: f64, source: RewardSource) -> Self {
        let unit = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            value: unit(value),
            confidence: unit(confidence),
            source,
        }
    }

    /// Reward from an auto-score
    ///
    /// `None` when the judge's confidence is below the floor: such scores are
    /// excluded from learning entirely.
    pub fn from_auto(score: &AutoScore, config: &ScoringConfig) -> Option<Self> {
        if score.confidence < config.confidence_floor {
            return None;
        }
        let value = weighted_reward(&score.scores, &config.reward_weights);
        Some(Self::new(value, score.confidence, RewardSource::Auto))
    }

    /// Reward from human ratings: `mean / scale_max`, confidence `min(1, n/N)`
    pub fn from_human(
        signal: &QualitySignal,
        rating_scale_max: f64,
        ratings_for_full_confidence: f64,
    ) -> Option<Self> {
        let mean = signal.local_mean()?;
        if rating_scale_max <= 0.0 {
            return None;
        }
        let confidence = if ratings_for_full_confidence <= 0.0 {
            1.0
        } else {
            (signal.rating_count as f64 / ratings_for_full_confidence).min(1.0)
        };
        Some(Self::new(
            mean / rating_scale_max,
            confidence,
            RewardSource::Human,
        ))
    }

    /// Confidence-weighted blend of two signals
    pub fn blend(a: &RewardSignal, b: &RewardSignal) -> RewardSignal {
        let total = a.confidence + b.confidence;
        let value = if total <= f64::EPSILON {
            (a.value + b.value) / 2.0
        } else {
            (a.confidence * a.value + b.confidence * b.value) / total
        };
        RewardSignal::new(value, a.confidence.max(b.confidence), RewardSource::Blended)
    }
}

/// Weighted combination of the dimensions present
///
/// Divided by the sum of the weights used, so an absent `authenticity`
/// does not deflate the reward.
pub fn weighted_reward(scores: &DimensionScores, weights: &RewardWeights) -> f64 {
    let mut terms = vec![
        (weights.overall, scores.overall),
        (weights.hook, scores.hook),
        (weights.originality, scores.originality),
        (weights.style_fit, scores.style_fit),
        (weights.safety, scores.safety),
    ];
    if let Some(authenticity) = scores.authenticity {
        terms.push((weights.authenticity, authenticity));
    }

    let weight_sum: f64 = terms.iter().map(|(w, _)| w).sum();
    if weight_sum <= f64::EPSILON {
        return scores.overall.clamp(0.0, 1.0);
    }
    let total: f64 = terms.iter().map(|(w, v)| w * v).sum();
    (total / weight_sum).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(v: f64) -> DimensionScores {
        DimensionScores {
            overall: v,
            hook: v,
            originality: v,
            style_fit: v,
            safety: v,
            authenticity: None,
        }
    }

    #[test]
    fn test_weighted_reward_uniform() {
        let r = weighted_reward(&scores(0.8), &RewardWeights::default());
        assert!((r - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_overall_weighted_most() {
        let mut high_overall = scores(0.5);
        high_overall.overall = 1.0;
        let mut high_hook = scores(0.5);
        high_hook.hook = 1.0;

        let w = RewardWeights::default();
        assert!(weighted_reward(&high_overall, &w) > weighted_reward(&high_hook, &w));
    }

    #[test]
    fn test_authenticity_with_zero_weight_is_neutral() {
        let mut with = scores(0.6);
        with.authenticity = Some(0.0);
        let w = RewardWeights::default();
        assert!((weighted_reward(&with, &w) - weighted_reward(&scores(0.6), &w)).abs() < 1e-12);
    }

    #[test]
    fn test_human_reward() {
        let one = QualitySignal::uniform(1, 5.0);
        let r = RewardSignal::from_human(&one, 5.0, 3.0).unwrap();
        assert_eq!(r.value, 1.0);
        assert!((r.confidence - 1.0 / 3.0).abs() < 1e-12);

        let many = QualitySignal::uniform(6, 4.0);
        let r = RewardSignal::from_human(&many, 5.0, 3.0).unwrap();
        assert!((r.value - 0.8).abs() < 1e-12);
        assert_eq!(r.confidence, 1.0);

        assert!(RewardSignal::from_human(&QualitySignal::default(), 5.0, 3.0).is_none());
    }

    #[test]
    fn test_blend_by_confidence() {
        let human = RewardSignal::new(1.0, 0.75, RewardSource::Human);
        let auto = RewardSignal::new(0.5, 0.25, RewardSource::Auto);
        let blended = RewardSignal::blend(&human, &auto);
        assert!((blended.value - 0.875).abs() < 1e-12);
        assert_eq!(blended.confidence, 0.75);
        assert_eq!(blended.source, RewardSource::Blended);
    }
}
