//! Crawler, indexer and moderation pipeline for plebbit forums.
//!
//! Continuously discovers forum addresses (a curated static list plus an
//! analytics warehouse query), tracks them through a durable crawl queue,
//! fetches and flattens their post/reply trees into a deduplicated index,
//! and classifies newly observed content through a prioritized cascade of
//! external classifiers.

pub mod config;
pub mod discovery;
pub mod error;
pub mod flatten;
pub mod indexer;
pub mod listener;
pub mod moderation;
pub mod queue;
pub mod scheduler;
pub mod storage;
pub mod testing;
pub mod traits;
pub mod types;

pub use config::Config;
pub use error::{IndexerError, Result};
pub use indexer::{CrawlMode, IndexReport, Indexer};
pub use listener::UpdateListeners;
pub use moderation::{CascadeOutcome, Moderator};
pub use queue::{DrainReport, QueueProcessor};
pub use storage::PostgresIndexStore;
pub use traits::{Classify, IndexStore};
pub use types::*;
