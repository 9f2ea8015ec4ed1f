//! Error types for the Dune client.

use thiserror::Error;

/// Result type for Dune client operations.
pub type Result<T> = std::result::Result<T, DuneError>;

/// Dune client errors.
#[derive(Debug, Error)]
pub enum DuneError {
    /// HTTP transport failure (connection, timeout, TLS)
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response from the API
    #[error("Dune API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Query execution finished in a terminal non-success state
    #[error("query execution failed with state {0}")]
    ExecutionFailed(String),
}
