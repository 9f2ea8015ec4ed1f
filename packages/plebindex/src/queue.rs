//! Crawl queue processing.
//!
//! State machine: `queued -> processing -> {success, failed}`, with
//! `failed -> queued` via explicit retry or reconciliation. `success` does
//! not re-queue automatically; ongoing monitoring of an address happens
//! through its update listener.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};

use plebbit_client::ForumClient;

use crate::error::Result;
use crate::indexer::{CrawlMode, Indexer};
use crate::traits::IndexStore;
use crate::types::DiscoverySource;

/// Grace windows before an address no longer advertised upstream is evicted.
/// The curated list is cheap to re-fetch, so absence there is a stronger
/// signal than absence from the analytics warehouse.
const GITHUB_GRACE_DAYS: i64 = 7;
const DUNE_GRACE_DAYS: i64 = 30;

/// What one drain run did.
#[derive(Debug, Default)]
pub struct DrainReport {
    pub processed: usize,
    pub succeeded: Vec<String>,
    pub failed: usize,
    /// The advisory single-flight guard skipped this run.
    pub skipped: bool,
}

pub struct QueueProcessor<S, C> {
    store: Arc<S>,
    indexer: Arc<Indexer<S, C>>,
    batch_size: i64,
}

impl<S, C> QueueProcessor<S, C>
where
    S: IndexStore,
    C: ForumClient,
{
    pub fn new(store: Arc<S>, indexer: Arc<Indexer<S, C>>, batch_size: i64) -> Self {
        Self {
            store,
            indexer,
            batch_size,
        }
    }

    /// Recover from a crashed run and make every known address queueable
    /// again: stuck `processing` items go back to `queued`, and known
    /// addresses with no queue row get one.
    pub async fn reconcile(&self) -> Result<()> {
        let released = self.store.release_stuck().await?;
        if released > 0 {
            tracing::warn!(released, "Reset stuck processing items back to queued");
        }

        let missing = self.store.addresses_missing_from_queue().await?;
        for address in &missing {
            self.store.enqueue(address).await?;
        }
        if !missing.is_empty() {
            tracing::info!(enqueued = missing.len(), "Enqueued known addresses missing from queue");
        }

        Ok(())
    }

    /// Evict known addresses their source stopped advertising. This
    /// indirectly stops further queueing of dead forums.
    pub async fn evict_stale(&self) -> Result<u64> {
        let mut evicted = 0;

        evicted += self
            .store
            .purge_known_not_seen_since(
                DiscoverySource::Github,
                Utc::now() - ChronoDuration::days(GITHUB_GRACE_DAYS),
            )
            .await?;

        evicted += self
            .store
            .purge_known_not_seen_since(
                DiscoverySource::Dune,
                Utc::now() - ChronoDuration::days(DUNE_GRACE_DAYS),
            )
            .await?;

        if evicted > 0 {
            tracing::info!(evicted, "Evicted stale known subplebbits");
        }

        Ok(evicted)
    }

    /// Process up to one batch of queued addresses. Items are claimed
    /// individually (conditional `queued -> processing`) before work starts,
    /// so a crash mid-batch leaves only the in-flight item inconsistent.
    pub async fn drain(&self) -> Result<DrainReport> {
        let mut report = DrainReport::default();

        // Advisory, non-atomic guard against self-overlap of the periodic
        // scheduler. Rare double-processing under truly concurrent operators
        // is tolerated; indexing is idempotent per cid.
        let processing = self.store.processing_count().await?;
        if processing > 0 {
            tracing::info!(processing, "Drain skipped, a previous run is still processing");
            report.skipped = true;
            return Ok(report);
        }

        let batch = self.store.queued_batch(self.batch_size).await?;
        for address in batch {
            if !self.store.claim(&address).await? {
                continue;
            }
            report.processed += 1;

            match self
                .indexer
                .index_subplebbit(&address, CrawlMode::Full)
                .await
            {
                Ok(index_report) => {
                    tracing::info!(
                        address = %address,
                        written = index_report.written,
                        "Crawl succeeded"
                    );
                    self.store.record_success(&address).await?;
                    report.succeeded.push(address);
                }
                Err(e) => {
                    tracing::warn!(address = %address, error = %e, "Crawl failed");
                    self.store.record_failure(&address, &e.to_string()).await?;
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    use plebbit_client::testing::{MockForum, MockForumClient};
    use plebbit_client::{Author, Comment, Page, Replies};

    use crate::discovery;
    use crate::testing::MemoryStore;
    use crate::types::QueueStatus;

    fn comment(cid: &str, title: Option<&str>) -> Comment {
        Comment {
            cid: cid.to_string(),
            timestamp: 1_700_000_000,
            title: title.map(|t| t.to_string()),
            content: Some("text".to_string()),
            author: Author {
                address: "someone.eth".to_string(),
                display_name: None,
            },
            upvote_count: 0,
            downvote_count: 0,
            reply_count: 0,
            parent_cid: None,
            post_cid: None,
            depth: None,
            replies: None,
            extra: serde_json::Map::new(),
        }
    }

    fn processor(
        store: Arc<MemoryStore>,
        client: Arc<MockForumClient>,
    ) -> QueueProcessor<MemoryStore, MockForumClient> {
        let indexer = Arc::new(Indexer::new(
            store.clone(),
            client,
            HashSet::new(),
            HashSet::new(),
            Duration::from_secs(5),
        ));
        QueueProcessor::new(store, indexer, 5)
    }

    #[tokio::test]
    async fn discovery_to_indexed_end_to_end() {
        let store = Arc::new(MemoryStore::new());

        // Forum X: 2 pages (3 + 2 posts), one reply under the first post.
        let mut first = comment("QmP1", Some("first"));
        first.replies = Some(Replies::Flat(vec![comment("QmR1", None)]));
        let forum = MockForum::new("x.eth")
            .with_page_cid("new", "QmPageOne")
            .with_page(
                "QmPageOne",
                Page {
                    comments: vec![first, comment("QmP2", Some("b")), comment("QmP3", Some("c"))],
                    next_cid: Some("QmPageTwo".to_string()),
                },
            )
            .with_page(
                "QmPageTwo",
                Page {
                    comments: vec![comment("QmP4", Some("d")), comment("QmP5", Some("e"))],
                    next_cid: None,
                },
            );
        let client = Arc::new(MockForumClient::new().with_forum(forum));
        let processor = processor(store.clone(), client);

        // Discovery observes X and hands it to the queue.
        discovery::ingest(
            store.as_ref(),
            DiscoverySource::Github,
            vec![("x.eth".into(), Vec::new())],
        )
        .await
        .unwrap();

        processor.reconcile().await.unwrap();
        let report = processor.drain().await.unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.succeeded, vec!["x.eth"]);
        assert_eq!(store.post_count(), 6);

        let reply = store.get_post("QmR1").await.unwrap().unwrap();
        assert_eq!(reply.parent_cid.as_deref(), Some("QmP1"));
        assert_eq!(reply.post_cid.as_deref(), Some("QmP1"));

        let item = store.get_queue_item("x.eth").await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Success);
        assert_eq!(item.success_count, 1);
    }

    #[tokio::test]
    async fn advisory_guard_skips_run_while_processing() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(MockForumClient::new());
        let processor = processor(store.clone(), client);

        store.enqueue("a.eth").await.unwrap();
        store.enqueue("b.eth").await.unwrap();
        store.claim("a.eth").await.unwrap();

        let report = processor.drain().await.unwrap();
        assert!(report.skipped);
        assert_eq!(report.processed, 0);

        let b = store.get_queue_item("b.eth").await.unwrap().unwrap();
        assert_eq!(b.status, QueueStatus::Queued);
    }

    #[tokio::test]
    async fn reconcile_resets_stuck_items_and_enqueues_missing() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(MockForumClient::new());
        let processor = processor(store.clone(), client);

        // A crashed run left a.eth in processing; b.eth is known but has no
        // queue row.
        store.enqueue("a.eth").await.unwrap();
        store.claim("a.eth").await.unwrap();
        store
            .upsert_known_subplebbit("b.eth", DiscoverySource::Dune, &[])
            .await
            .unwrap();

        processor.reconcile().await.unwrap();

        let a = store.get_queue_item("a.eth").await.unwrap().unwrap();
        assert_eq!(a.status, QueueStatus::Queued);
        let b = store.get_queue_item("b.eth").await.unwrap().unwrap();
        assert_eq!(b.status, QueueStatus::Queued);
    }

    #[tokio::test]
    async fn failed_crawl_keeps_address_in_queue() {
        let store = Arc::new(MemoryStore::new());
        // No forum registered: the fetch fails.
        let client = Arc::new(MockForumClient::new());
        let processor = processor(store.clone(), client);

        store.enqueue("ghost.eth").await.unwrap();
        let report = processor.drain().await.unwrap();

        assert_eq!(report.failed, 1);
        let item = store.get_queue_item("ghost.eth").await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.failure_count, 1);
        assert!(item.last_error.is_some());

        // Explicit retry re-enters the queue; the address never disappears.
        assert!(store.retry_failed("ghost.eth").await.unwrap());
        let item = store.get_queue_item("ghost.eth").await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Queued);
    }

    #[tokio::test]
    async fn stale_known_rows_are_evicted_by_source_specific_grace() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(MockForumClient::new());
        let processor = processor(store.clone(), client);

        // Older than the github grace window.
        store.seed_known(
            "stale.eth",
            DiscoverySource::Github,
            Utc::now() - ChronoDuration::days(GITHUB_GRACE_DAYS) - ChronoDuration::hours(1),
        );
        // One hour younger than the threshold.
        store.seed_known(
            "fresh.eth",
            DiscoverySource::Github,
            Utc::now() - ChronoDuration::days(GITHUB_GRACE_DAYS) + ChronoDuration::hours(1),
        );
        // Past github's grace but within dune's.
        store.seed_known(
            "warehouse.eth",
            DiscoverySource::Dune,
            Utc::now() - ChronoDuration::days(GITHUB_GRACE_DAYS) - ChronoDuration::hours(1),
        );

        let evicted = processor.evict_stale().await.unwrap();

        assert_eq!(evicted, 1);
        let remaining = store.list_known_addresses().await.unwrap();
        assert_eq!(remaining, vec!["fresh.eth", "warehouse.eth"]);
    }
}
