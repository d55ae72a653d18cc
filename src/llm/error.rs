//! Completion-provider error handling.

use thiserror::Error;

/// Errors raised by completion providers.
#[derive(Error, Debug)]
pub enum LlmError {
    /// API key not found in the environment or settings file.
    #[error("LLM API key not found. Set LLM_API_KEY or OPENAI_API_KEY environment variable")]
    ApiKeyNotFound,

    /// The completion endpoint answered with an error.
    #[error("LLM API request failed: {0}")]
    ApiRequestFailed(String),

    /// The completion endpoint answered with something we could not use.
    #[error("Invalid response format from LLM API: {0}")]
    InvalidResponseFormat(String),

    /// Rate limit still exceeded after every retry.
    #[error("Rate limit exceeded. Please try again later")]
    RateLimitExceeded,

    /// Network connectivity error.
    #[error("Network error: {0}")]
    NetworkError(String),
}
