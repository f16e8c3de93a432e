//! Policy learning
//!
//! A contextual multi-armed bandit per (persona, content type) bucket. It
//! learns the hybrid ranker's weights and the generation temperature band
//! from confidence-weighted rewards.
//!
//! # Phases
//!
//! - `Unseen`: no record yet; global defaults
//! - `Exploring`: epsilon held at its initial value
//! - `Converging`: epsilon decays geometrically toward its floor
//! - `Stable`: recent weight deltas below the variance threshold

pub mod arms;
pub mod learner;
pub mod state;
pub mod store;

pub use arms::{nearest_arm, Arm, ArmId};
pub use learner::{PolicyLearner, PolicyPlan, PolicyUpdate};
pub use state::{AppliedReward, ArmStats, PolicyPhase, PolicyRecord};
pub use store::{InMemoryPolicyStore, PolicyStore};
