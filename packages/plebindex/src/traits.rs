//! Trait seams for the durable store and the classifier, so every component
//! is generic and mockable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use classifier_client::{ClassifierClient, Verdict};

use crate::error::Result;
use crate::types::*;

/// The persistent store. Exclusive owner of all durable state; every other
/// component holds only request-scoped views.
///
/// The read/admin operations at the bottom are the interface boundary for
/// the external REST façade (queue inspection, manual enqueue/retry, manual
/// flags and moderation actions).
#[async_trait]
pub trait IndexStore: Send + Sync {
    // ========================================================================
    // KNOWN SUBPLEBBITS
    // ========================================================================

    /// Insert a newly discovered address or refresh an existing one
    /// (`last_seen_at` bumped, tags overwritten with the latest).
    async fn upsert_known_subplebbit(
        &self,
        address: &str,
        source: DiscoverySource,
        tags: &[String],
    ) -> Result<UpsertOutcome>;

    /// Refresh the cached display title after a crawl.
    async fn update_known_title(&self, address: &str, title: Option<&str>) -> Result<()>;

    async fn list_known_addresses(&self) -> Result<Vec<String>>;

    /// Remove structurally invalid rows (empty address or source).
    async fn purge_invalid_known(&self) -> Result<u64>;

    /// Remove rows from `source` not re-observed since `cutoff`.
    async fn purge_known_not_seen_since(
        &self,
        source: DiscoverySource,
        cutoff: DateTime<Utc>,
    ) -> Result<u64>;

    // ========================================================================
    // CRAWL QUEUE
    // ========================================================================

    /// Add an address to the queue as `queued`. Returns false if it was
    /// already present (any status).
    async fn enqueue(&self, address: &str) -> Result<bool>;

    /// Up to `limit` queued addresses, oldest-updated first.
    async fn queued_batch(&self, limit: i64) -> Result<Vec<String>>;

    /// Conditional `queued -> processing` transition, also counting the run.
    /// Returns false when the item was not in `queued` (claimed elsewhere).
    async fn claim(&self, address: &str) -> Result<bool>;

    /// Reset every `processing` item back to `queued` (crash recovery).
    async fn release_stuck(&self) -> Result<u64>;

    /// Advisory count used by the single-flight guard.
    async fn processing_count(&self) -> Result<i64>;

    /// Known addresses that have no queue row yet.
    async fn addresses_missing_from_queue(&self) -> Result<Vec<String>>;

    async fn record_success(&self, address: &str) -> Result<()>;

    async fn record_failure(&self, address: &str, error: &str) -> Result<()>;

    /// Admin retry: `failed -> queued`. Returns false when not failed.
    async fn retry_failed(&self, address: &str) -> Result<bool>;

    async fn get_queue_item(&self, address: &str) -> Result<Option<QueueItem>>;

    async fn list_queue(&self) -> Result<Vec<QueueItem>>;

    // ========================================================================
    // POSTS
    // ========================================================================

    /// Persist a batch in one transaction. Each post's existing row (same
    /// cid) is deleted first: crawl results are authoritative snapshots.
    /// Returns the number of rows written.
    async fn index_posts(&self, posts: &[Post]) -> Result<u64>;

    async fn get_post(&self, cid: &str) -> Result<Option<Post>>;

    async fn query_posts(&self, query: &PostQuery) -> Result<Vec<Post>>;

    /// Explicit deletion of the historical row (admin action, distinct from
    /// deindexing).
    async fn delete_post(&self, cid: &str) -> Result<bool>;

    /// Posts not yet stamped by the moderation pass, oldest first.
    async fn unmoderated_posts(&self, limit: i64) -> Result<Vec<Post>>;

    /// Stamp `moderated_at` once; later calls are no-ops.
    async fn mark_moderated(&self, cid: &str) -> Result<()>;

    // ========================================================================
    // FLAGGED POSTS
    // ========================================================================

    /// Everything excluded from future indexing by `deindexed_*` actions.
    async fn deindex_exclusions(&self) -> Result<Exclusions>;

    /// Record a flag (first flag for a cid wins; re-flagging is a no-op).
    async fn insert_flagged(&self, flagged: &FlaggedPost) -> Result<()>;

    async fn get_flagged(&self, cid: &str) -> Result<Option<FlaggedPost>>;

    async fn list_flagged(&self, status: Option<FlagAction>) -> Result<Vec<FlaggedPost>>;

    /// Admin moderation action transitioning a flag's status. Returns false
    /// when no flag exists for the cid.
    async fn set_flag_status(&self, cid: &str, status: FlagAction) -> Result<bool>;
}

/// A content classifier addressed by model name. Implemented for the real
/// chat-completion client and by scripted mocks in tests.
#[async_trait]
pub trait Classify: Send + Sync {
    async fn classify(&self, model: &str, text: &str) -> classifier_client::Result<Verdict>;
}

#[async_trait]
impl Classify for ClassifierClient {
    async fn classify(&self, model: &str, text: &str) -> classifier_client::Result<Verdict> {
        ClassifierClient::classify(self, model, text).await
    }
}
