//! External collaborators: the LLM judge and the generation capability

pub mod generator;
pub mod llm;

pub use generator::Generator;
pub use llm::{api_key_from_env, LlmJudge, FALLBACK_API_KEY_ENV, JUDGE_API_KEY_ENV};
