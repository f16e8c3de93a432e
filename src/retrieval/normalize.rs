//! Score normalizers
//!
//! Pure functions mapping each raw ranking signal into [0,1]. Degenerate
//! inputs (NaN, zero variance, empty sets, future timestamps) never produce
//! an out-of-range value.

use crate::config::{NormalizationConfig, NEUTRAL_SCORE};
use crate::types::QualitySignal;
use chrono::{DateTime, Utc};

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Semantic score from a cosine similarity: `(cos + 1) / 2`
pub fn semantic(cosine: f64) -> f64 {
    if !cosine.is_finite() {
        return NEUTRAL_SCORE;
    }
    (cosine.clamp(-1.0, 1.0) + 1.0) / 2.0
}

/// Min-max normalize one raw score against the candidate set's range
///
/// Zero variance yields the neutral score.
pub fn lexical(raw: f64, min: f64, max: f64) -> f64 {
    let range = max - min;
    if !raw.is_finite() || !range.is_finite() || range <= f64::EPSILON {
        return NEUTRAL_SCORE;
    }
    ((raw - min) / range).clamp(0.0, 1.0)
}

/// Min-max normalize a whole candidate set
pub fn min_max(raws: &[f64]) -> Vec<f64> {
    let finite = raws.iter().copied().filter(|v| v.is_finite());
    let min = finite.clone().fold(f64::INFINITY, f64::min);
    let max = finite.fold(f64::NEG_INFINITY, f64::max);
    raws.iter().map(|&raw| lexical(raw, min, max)).collect()
}

/// Bayesian-shrunk mean rating on the rating scale
///
/// `(n/(n+k))·local_mean + (k/(n+k))·G`; equals `G` with no ratings.
pub fn shrunk_rating(signal: &QualitySignal, config: &NormalizationConfig) -> f64 {
    let k = config.shrinkage_prior_strength.max(0.0);
    let global = config.global_mean_rating;
    let local_mean = match signal.local_mean() {
        Some(mean) if mean.is_finite() => mean,
        _ => return global,
    };

    let n = signal.rating_count as f64;
    if n + k <= 0.0 {
        return global;
    }
    (n / (n + k)) * local_mean + (k / (n + k)) * global
}

/// Quality score: shrunk rating divided by the rating scale max
pub fn quality(signal: &QualitySignal, config: &NormalizationConfig) -> f64 {
    if config.rating_scale_max <= 0.0 {
        return NEUTRAL_SCORE;
    }
    let value = shrunk_rating(signal, config) / config.rating_scale_max;
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        NEUTRAL_SCORE
    }
}

/// Freshness score `exp(-age_days / λ)`
///
/// Negative ages (clock skew) count as brand new.
pub fn freshness(age_days: f64, decay_days: f64) -> f64 {
    if age_days.is_nan() || decay_days <= 0.0 {
        return NEUTRAL_SCORE;
    }
    (-age_days.max(0.0) / decay_days).exp().clamp(0.0, 1.0)
}

/// Freshness of an item created at `created_at`, seen at `now`
pub fn freshness_at(created_at: DateTime<Utc>, now: DateTime<Utc>, decay_days: f64) -> f64 {
    let age_days = (now - created_at).num_milliseconds() as f64 / 1000.0 / SECONDS_PER_DAY;
    freshness(age_days, decay_days)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn cfg() -> NormalizationConfig {
        NormalizationConfig::default()
    }

    #[test]
    fn test_semantic_bounds() {
        assert_eq!(semantic(-1.0), 0.0);
        assert_eq!(semantic(0.0), 0.5);
        assert_eq!(semantic(1.0), 1.0);
        assert_eq!(semantic(1.7), 1.0);
        assert_eq!(semantic(-3.0), 0.0);
        assert_eq!(semantic(f64::NAN), NEUTRAL_SCORE);
    }

    #[test]
    fn test_lexical_zero_variance_is_neutral() {
        assert_eq!(lexical(3.0, 3.0, 3.0), 0.5);
        assert_eq!(min_max(&[2.0]), vec![0.5]);
        assert_eq!(min_max(&[0.0, 0.0, 0.0]), vec![0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_min_max() {
        let scores = min_max(&[1.0, 3.0, 2.0]);
        assert_eq!(scores, vec![0.0, 1.0, 0.5]);
        assert!(min_max(&[]).is_empty());
    }

    #[test]
    fn test_quality_no_ratings_is_prior() {
        let signal = QualitySignal::default();
        assert_eq!(shrunk_rating(&signal, &cfg()), 4.2);
        assert!((quality(&signal, &cfg()) - 0.84).abs() < 1e-12);
    }

    #[test]
    fn test_quality_shrinkage_ordering() {
        let zero = QualitySignal::default();
        let one = QualitySignal::uniform(1, 5.0);
        let twenty = QualitySignal::uniform(20, 5.0);

        let q0 = quality(&zero, &cfg());
        let q1 = quality(&one, &cfg());
        let q20 = quality(&twenty, &cfg());

        assert!(q0 < q1 && q1 < q20);
        for q in [q0, q1, q20] {
            assert!((0.0..=1.0).contains(&q));
        }
        // (20/30)*5 + (10/30)*4.2 = 4.7333
        assert!((shrunk_rating(&twenty, &cfg()) - 4.733_333).abs() < 1e-5);
    }

    #[test]
    fn test_freshness() {
        assert_eq!(freshness(0.0, 28.0), 1.0);
        assert!((freshness(28.0, 28.0) - (-1.0f64).exp()).abs() < 1e-12);
        assert!(freshness(10_000.0, 28.0) < 1e-100);
        assert_eq!(freshness(-5.0, 28.0), 1.0);
        assert_eq!(freshness(f64::INFINITY, 28.0), 0.0);
    }

    #[test]
    fn test_freshness_at_uses_fractional_days() {
        let now = Utc::now();
        let half_day = freshness_at(now - Duration::hours(12), now, 28.0);
        assert!((half_day - (-0.5f64 / 28.0).exp()).abs() < 1e-9);
    }
}
