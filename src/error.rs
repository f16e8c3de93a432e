//! Error types for the Calliope exemplar engine
//!
//! This module provides comprehensive error handling using thiserror for
//! structured error definitions and anyhow for error propagation.

use thiserror::Error;

/// Main error type for Calliope operations
#[derive(Error, Debug)]
pub enum CalliopeError {
    /// Judge output could not be parsed into dimension scores
    #[error("Score parse error: {0}")]
    ScoreParse(String),

    /// Optimistic write to a bucket kept losing against concurrent writers
    #[error("Bandit update conflict on bucket {bucket} after {attempts} attempts")]
    BanditUpdateConflict { bucket: String, attempts: u32 },

    /// Judge endpoint unreachable or returned a server error
    #[error("Judge unavailable: {0}")]
    JudgeUnavailable(String),

    /// Judge call exceeded its deadline
    #[error("Judge call timed out after {0}ms")]
    JudgeTimeout(u64),

    /// Generation collaborator failed
    #[error("Generation error: {0}")]
    Generation(String),

    /// Embedding generation failed
    #[error("Embedding error: {0}")]
    Embedding(String),

    /// Rate limit hit on a remote provider
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input (rating out of scale, empty text, ...)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP request error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl CalliopeError {
    /// Whether a retry with backoff may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CalliopeError::JudgeUnavailable(_)
                | CalliopeError::JudgeTimeout(_)
                | CalliopeError::RateLimitExceeded(_)
        )
    }
}

/// Result type alias for Calliope operations
pub type Result<T> = std::result::Result<T, CalliopeError>;

/// Convert anyhow::Error to CalliopeError
impl From<anyhow::Error> for CalliopeError {
    fn from(err: anyhow::Error) -> Self {
        CalliopeError::Other(err.to_string())
    }
}

impl From<toml::de::Error> for CalliopeError {
    fn from(err: toml::de::Error) -> Self {
        CalliopeError::Config(err.to_string())
    }
}
