//! Judge capability
//!
//! The external quality judge is reached only through this trait, so tests
//! substitute deterministic stubs while production uses
//! [`crate::services::LlmJudge`].

use crate::error::Result;
use crate::types::RetrievalContext;
use async_trait::async_trait;

/// External quality judge
///
/// Returns the judge's raw text; parsing belongs to the auto-scorer.
/// Transient failures are reported as `JudgeUnavailable`, `JudgeTimeout` or
/// `RateLimitExceeded` so they can be retried.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Judge: Send + Sync {
    async fn judge(&self, candidate: &str, context: &RetrievalContext) -> Result<String>;
}

/// Instructions sent to LLM judges
pub const JUDGE_SYSTEM_PROMPT: &str = r#"You are an expert short-form video script analyst. Score the script on these dimensions, each from 0.0 (worst) to 1.0 (best):

overall: general quality and effectiveness
hook: how compelling the opening is
originality: how unique and creative it is
style_fit: how well it matches the persona
safety: platform compliance
authenticity: how natural it sounds rather than forced

Return ONLY a JSON object: {"overall": X, "hook": X, "originality": X, "style_fit": X, "safety": X, "authenticity": X, "confidence": X, "reasoning": "brief explanation"}
confidence is how certain you are, from 0.0 to 1.0."#;

/// User message for one candidate
pub fn judge_user_prompt(candidate: &str, context: &RetrievalContext) -> String {
    format!(
        "Persona: {}\nContent type: {}\n\nScript to score:\n{}\n\nScore this script now.",
        context.persona, context.content_type, candidate
    )
}
