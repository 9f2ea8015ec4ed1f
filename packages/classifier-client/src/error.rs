//! Error types for the classifier client.

use std::time::Duration;

use thiserror::Error;

/// Result type for classifier operations.
pub type Result<T> = std::result::Result<T, ClassifierError>;

/// Classifier client errors.
#[derive(Debug, Error)]
pub enum ClassifierError {
    /// Configuration error (missing API key, invalid settings)
    #[error("configuration error: {0}")]
    Config(String),

    /// Network error (connection failed, timeout)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Provider asked us to back off; retry no earlier than `retry_after`
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Non-2xx, non-429 response from the API
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Invalid JSON or unexpected response shape from the model
    #[error("parse error: {0}")]
    Parse(String),
}

impl ClassifierError {
    /// Whether this failure is a provider back-off request.
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ClassifierError::RateLimited { .. })
    }
}
