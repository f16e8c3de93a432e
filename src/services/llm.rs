//! LLM judge over an OpenAI-compatible chat completions API
//!
//! DeepSeek by default. The API key is read from `CALLIOPE_JUDGE_API_KEY`,
//! falling back to `DEEPSEEK_API_KEY`.

use crate::config::JudgeConfig;
use crate::error::{CalliopeError, Result};
use crate::evaluation::{judge_user_prompt, Judge, JUDGE_SYSTEM_PROMPT};
use crate::types::RetrievalContext;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::env;
use tracing::debug;

/// Primary API key variable
pub const JUDGE_API_KEY_ENV: &str = "CALLIOPE_JUDGE_API_KEY";

/// Fallback API key variable
pub const FALLBACK_API_KEY_ENV: &str = "DEEPSEEK_API_KEY";

/// Judge API key from the environment
pub fn api_key_from_env() -> Option<String> {
    [JUDGE_API_KEY_ENV, FALLBACK_API_KEY_ENV]
        .into_iter()
        .filter_map(|name| env::var(name).ok())
        .find(|key| !key.trim().is_empty())
}

/// LLM-backed judge
pub struct LlmJudge {
    config: JudgeConfig,
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Message>,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

impl LlmJudge {
    pub fn new(config: JudgeConfig, api_key: String) -> Result<Self> {
        if api_key.is_empty() {
            return Err(CalliopeError::Config(format!(
                "{} not set",
                JUDGE_API_KEY_ENV
            )));
        }

        Ok(Self {
            config,
            api_key,
            client: reqwest::Client::new(),
        })
    }

    /// Create with the API key from the environment
    pub fn from_env(config: JudgeConfig) -> Result<Self> {
        let api_key = api_key_from_env().ok_or_else(|| {
            CalliopeError::Config(format!(
                "neither {} nor {} is set",
                JUDGE_API_KEY_ENV, FALLBACK_API_KEY_ENV
            ))
        })?;
        Self::new(config, api_key)
    }

    fn request(&self, candidate: &str, context: &RetrievalContext) -> ChatRequest {
        ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: JUDGE_SYSTEM_PROMPT.to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: judge_user_prompt(candidate, context),
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }

    async fn call_api(&self, request: &ChatRequest) -> Result<String> {
        debug!("Calling judge model {}", self.config.model);

        let url = format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    CalliopeError::JudgeUnavailable(e.to_string())
                } else {
                    CalliopeError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => CalliopeError::RateLimitExceeded(error_text),
                s if s.is_server_error() => {
                    CalliopeError::JudgeUnavailable(format!("status {}: {}", s, error_text))
                }
                s => CalliopeError::Other(format!(
                    "judge request failed with status {}: {}",
                    s, error_text
                )),
            });
        }

        let body: ChatResponse = response.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CalliopeError::ScoreParse("empty judge response".to_string()))
    }
}

#[async_trait]
impl Judge for LlmJudge {
    async fn judge(&self, candidate: &str, context: &RetrievalContext) -> Result<String> {
        let request = self.request(candidate, context);
        self.call_api(&request).await
    }
}
