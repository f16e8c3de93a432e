//! Discretized policy configurations
//!
//! Each arm pairs a ranking weight vector with a generation temperature
//! band. `Balanced` equals the global defaults used for unseen buckets.

use crate::error::{CalliopeError, Result};
use crate::types::{TemperatureBand, WeightVector};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArmId {
    Balanced,
    SemanticHeavy,
    QualityFocused,
    FreshFocused,
    Conservative,
    Creative,
    TextHeavy,
}

impl ArmId {
    pub const ALL: [ArmId; 7] = [
        ArmId::Balanced,
        ArmId::SemanticHeavy,
        ArmId::QualityFocused,
        ArmId::FreshFocused,
        ArmId::Conservative,
        ArmId::Creative,
        ArmId::TextHeavy,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ArmId::Balanced => "balanced",
            ArmId::SemanticHeavy => "semantic_heavy",
            ArmId::QualityFocused => "quality_focused",
            ArmId::FreshFocused => "fresh_focused",
            ArmId::Conservative => "conservative",
            ArmId::Creative => "creative",
            ArmId::TextHeavy => "text_heavy",
        }
    }

    pub fn arm(&self) -> Arm {
        let (weights, temperatures) = match self {
            ArmId::Balanced => (
                WeightVector::GLOBAL_DEFAULT,
                TemperatureBand::GLOBAL_DEFAULT,
            ),
            ArmId::SemanticHeavy => (
                WeightVector::new(0.60, 0.15, 0.15, 0.10),
                TemperatureBand::GLOBAL_DEFAULT,
            ),
            ArmId::QualityFocused => (
                WeightVector::new(0.35, 0.20, 0.35, 0.10),
                TemperatureBand::new(0.3, 0.6, 0.85),
            ),
            ArmId::FreshFocused => (
                WeightVector::new(0.40, 0.20, 0.15, 0.25),
                TemperatureBand::new(0.5, 0.8, 1.0),
            ),
            ArmId::Conservative => (
                WeightVector::GLOBAL_DEFAULT,
                TemperatureBand::new(0.3, 0.5, 0.7),
            ),
            ArmId::Creative => (
                WeightVector::GLOBAL_DEFAULT,
                TemperatureBand::new(0.6, 0.9, 1.2),
            ),
            ArmId::TextHeavy => (
                WeightVector::new(0.25, 0.45, 0.20, 0.10),
                TemperatureBand::GLOBAL_DEFAULT,
            ),
        };
        Arm {
            id: *self,
            weights,
            temperatures,
        }
    }
}

impl std::fmt::Display for ArmId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ArmId {
    type Err = CalliopeError;

    fn from_str(s: &str) -> Result<Self> {
        ArmId::ALL
            .into_iter()
            .find(|arm| arm.name() == s)
            .ok_or_else(|| CalliopeError::InvalidInput(format!("unknown arm '{}'", s)))
    }
}

/// One configuration the bandit can trial
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Arm {
    pub id: ArmId,
    pub weights: WeightVector,
    pub temperatures: TemperatureBand,
}

/// Arm whose weights are nearest (L1) to `weights`
///
/// Arms sharing a weight vector resolve to the first in `ArmId::ALL`.
pub fn nearest_arm(weights: &WeightVector) -> ArmId {
    let mut best = ArmId::Balanced;
    let mut best_distance = f64::INFINITY;
    for id in ArmId::ALL {
        let distance = id.arm().weights.l1_distance(weights);
        if distance < best_distance {
            best = id;
            best_distance = distance;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_arm_weights_normalized() {
        for id in ArmId::ALL {
            let arm = id.arm();
            assert!((arm.weights.sum() - 1.0).abs() < 1e-12, "{}", id);
            assert!(arm.temperatures.low <= arm.temperatures.mid);
            assert!(arm.temperatures.mid <= arm.temperatures.high);
        }
    }

    #[test]
    fn test_name_round_trip() {
        for id in ArmId::ALL {
            assert_eq!(id.name().parse::<ArmId>().unwrap(), id);
        }
        assert!("greedy".parse::<ArmId>().is_err());
    }

    #[test]
    fn test_nearest_arm() {
        assert_eq!(nearest_arm(&WeightVector::GLOBAL_DEFAULT), ArmId::Balanced);
        assert_eq!(
            nearest_arm(&WeightVector::new(0.33, 0.2, 0.37, 0.1)),
            ArmId::QualityFocused
        );
        assert_eq!(
            nearest_arm(&WeightVector::new(0.2, 0.5, 0.2, 0.1)),
            ArmId::TextHeavy
        );
    }
}
