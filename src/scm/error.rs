//! SCM backend error handling.

use thiserror::Error;

/// Errors raised by SCM adapters.
#[derive(Error, Debug)]
pub enum ScmError {
    /// Missing or invalid backend configuration.
    #[error("SCM configuration error: {0}")]
    Configuration(String),

    /// The requested entity does not exist or its identifier is malformed.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The backend rejected the credentials.
    #[error("Authentication rejected by {backend}: HTTP {status}")]
    Authentication {
        /// Backend name.
        backend: &'static str,
        /// HTTP status code.
        status: u16,
    },

    /// The backend answered with a non-success status.
    #[error("SCM API request failed: {0}")]
    ApiRequestFailed(String),

    /// The request never reached the backend.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The backend answered with something we could not decode.
    #[error("Invalid response format from SCM API: {0}")]
    InvalidResponseFormat(String),
}
