//! Language-model collaborator
//!
//! The core speaks to the model through exactly two operations: `embed`
//! and `chat`. Both may suspend and both may fail with a transport error
//! or a timeout. Transport errors are retried once; timeouts never are.

pub mod client;
pub mod mock;
pub mod openai;

pub use client::{ChatOptions, LanguageModel};
pub use mock::MockLanguageModel;
pub use openai::{OpenAiClient, OpenAiConfig};

use thiserror::Error;

/// LLM errors
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("network error: {0}")]
    Network(String),

    #[error("api error: {0}")]
    Api(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timeout")]
    Timeout,

    #[error("configuration error: {0}")]
    Configuration(String),
}

impl LlmError {
    /// Transport errors get one retry; everything else surfaces as-is.
    pub fn is_retryable(&self) -> bool {
        matches!(self, LlmError::Network(_))
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout
        } else {
            LlmError::Network(err.to_string())
        }
    }
}

impl From<LlmError> for parley_core::Error {
    fn from(err: LlmError) -> Self {
        parley_core::Error::GenerationBackendFailure(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_errors_are_retryable() {
        assert!(LlmError::Network("reset".into()).is_retryable());
        assert!(!LlmError::Timeout.is_retryable());
        assert!(!LlmError::Api("400".into()).is_retryable());
    }
}
