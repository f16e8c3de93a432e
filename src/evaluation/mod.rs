//! Candidate evaluation
//!
//! - **Judge**: capability trait for the external quality judge
//! - **AutoScorer**: timeout, retry and parsing of judge output; approval rules
//! - **RewardSignal**: auto, human and blended rewards for the policy learner

pub mod auto_scorer;
pub mod judge;
pub mod reward;

pub use auto_scorer::{
    parse_judge_response, ApprovalDecision, AutoScore, AutoScorer, DimensionScores, JudgeVerdict,
    ReviewReason, ScoreOutcome,
};
pub use judge::{judge_user_prompt, Judge, JUDGE_SYSTEM_PROMPT};
pub use reward::{weighted_reward, RewardSignal, RewardSource};
