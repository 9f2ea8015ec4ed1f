//! Typed errors for the indexer library.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can tell a
//! transient fetch failure from a structural one. The binary wiring layer
//! uses `anyhow` on top of these.

use thiserror::Error;

/// Errors that can occur while discovering, crawling, indexing or moderating.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Persistence operation failed
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// The network collaborator failed
    #[error("network client error: {0}")]
    Client(#[from] plebbit_client::PlebbitError),

    /// Static discovery feed failed
    #[error("discovery feed error: {0}")]
    Discovery(#[from] reqwest::Error),

    /// Analytics discovery feed failed
    #[error("analytics feed error: {0}")]
    Analytics(#[from] dune_client::DuneError),

    /// All classifiers failed in an unexpected way
    #[error("classifier error: {0}")]
    Classifier(#[from] classifier_client::ClassifierError),

    /// A network call exceeded its wall-clock budget
    #[error("fetch timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Configuration error (missing key, unparseable value)
    #[error("config error: {0}")]
    Config(String),
}

/// Result type alias for indexer operations.
pub type Result<T> = std::result::Result<T, IndexerError>;
