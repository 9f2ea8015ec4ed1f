//! Error types for the plebbit gateway client.

use thiserror::Error;

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, PlebbitError>;

/// Gateway client errors.
#[derive(Debug, Error)]
pub enum PlebbitError {
    /// HTTP transport failure (connection, timeout, TLS)
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response from the gateway
    #[error("gateway error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The network has no record of this forum
    #[error("subplebbit not found: {address}")]
    NotFound { address: String },
}
