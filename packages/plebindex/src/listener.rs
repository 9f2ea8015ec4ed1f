//! Per-forum update listeners.
//!
//! Every actively-crawled forum gets one persistent subscription. An
//! `update` event re-indexes the forum in incremental mode (newest post
//! only) and, when enabled, runs the moderation cascade synchronously over
//! the newly fetched posts. An `error` event marks the forum's queue item
//! failed.
//!
//! Listener callbacks may interleave with a scheduled full crawl of the same
//! forum; both write posts keyed by cid, so the last writer for a cid wins
//! and no per-forum lock is taken.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use plebbit_client::{ForumClient, ForumHandle, SubplebbitEvent};

use crate::error::Result;
use crate::indexer::{CrawlMode, Indexer};
use crate::moderation::Moderator;
use crate::traits::{Classify, IndexStore};

pub struct UpdateListeners<S, C, X> {
    store: Arc<S>,
    client: Arc<C>,
    indexer: Arc<Indexer<S, C>>,
    moderator: Option<Arc<Moderator<S, X>>>,
    moderate_on_update: bool,
    active: Mutex<HashSet<String>>,
}

impl<S, C, X> UpdateListeners<S, C, X>
where
    S: IndexStore + 'static,
    C: ForumClient + 'static,
    X: Classify + 'static,
{
    pub fn new(
        store: Arc<S>,
        client: Arc<C>,
        indexer: Arc<Indexer<S, C>>,
        moderator: Option<Arc<Moderator<S, X>>>,
        moderate_on_update: bool,
    ) -> Self {
        Self {
            store,
            client,
            indexer,
            moderator,
            moderate_on_update,
            active: Mutex::new(HashSet::new()),
        }
    }

    /// Addresses with a live listener.
    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap().len()
    }

    /// Start a listener for `address` unless one is already live.
    pub async fn ensure_listening(self: &Arc<Self>, address: &str) -> Result<()> {
        {
            let mut active = self.active.lock().unwrap();
            if !active.insert(address.to_string()) {
                return Ok(());
            }
        }

        let subscription = async {
            let handle = self.client.get_subplebbit(address).await?;
            handle.subscribe().await
        }
        .await;

        let mut events = match subscription {
            Ok(events) => events,
            Err(e) => {
                self.active.lock().unwrap().remove(address);
                return Err(e.into());
            }
        };

        tracing::info!(address, "Update listener started");

        let this = Arc::clone(self);
        let address = address.to_string();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    SubplebbitEvent::Update => {
                        match this
                            .indexer
                            .index_subplebbit(&address, CrawlMode::Incremental)
                            .await
                        {
                            Ok(report) => {
                                tracing::info!(
                                    address = %address,
                                    written = report.written,
                                    "Indexed update notification"
                                );
                                if this.moderate_on_update {
                                    if let Some(moderator) = &this.moderator {
                                        moderator.moderate_posts(&report.indexed).await;
                                    }
                                }
                            }
                            Err(e) => {
                                tracing::warn!(address = %address, error = %e, "Update indexing failed");
                                if let Err(e) =
                                    this.store.record_failure(&address, &e.to_string()).await
                                {
                                    tracing::warn!(address = %address, error = %e, "Failed to record failure");
                                }
                            }
                        }
                    }
                    SubplebbitEvent::Error(message) => {
                        tracing::warn!(address = %address, error = %message, "Forum subscription error");
                        if let Err(e) = this.store.record_failure(&address, &message).await {
                            tracing::warn!(address = %address, error = %e, "Failed to record failure");
                        }
                    }
                }
            }

            this.active.lock().unwrap().remove(&address);
            tracing::info!(address = %address, "Update listener stopped");
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use plebbit_client::testing::{MockForum, MockForumClient};
    use plebbit_client::{Author, Comment, Page};

    use classifier_client::ModerationCategory;

    use crate::testing::{MemoryStore, MockClassifier, MockOutcome};
    use crate::types::QueueStatus;

    fn comment(cid: &str, title: Option<&str>, content: &str) -> Comment {
        Comment {
            cid: cid.to_string(),
            timestamp: 1_700_000_000,
            title: title.map(|t| t.to_string()),
            content: Some(content.to_string()),
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

    fn forum_with_newest(cid: &str, content: &str) -> MockForum {
        MockForum::new("live.eth")
            .with_page_cid("new", "QmPage")
            .with_page(
                "QmPage",
                Page {
                    comments: vec![comment(cid, Some("hello"), content)],
                    next_cid: None,
                },
            )
    }

    fn listeners(
        store: Arc<MemoryStore>,
        client: Arc<MockForumClient>,
        moderator: Option<Arc<Moderator<MemoryStore, MockClassifier>>>,
        moderate_on_update: bool,
    ) -> Arc<UpdateListeners<MemoryStore, MockForumClient, MockClassifier>> {
        let indexer = Arc::new(Indexer::new(
            store.clone(),
            client.clone(),
            HashSet::new(),
            HashSet::new(),
            Duration::from_secs(5),
        ));
        Arc::new(UpdateListeners::new(
            store,
            client,
            indexer,
            moderator,
            moderate_on_update,
        ))
    }

    #[tokio::test]
    async fn update_event_triggers_incremental_index() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(MockForumClient::new().with_forum(forum_with_newest("QmNew", "hi")));
        let listeners = listeners(store.clone(), client.clone(), None, false);

        listeners.ensure_listening("live.eth").await.unwrap();
        assert_eq!(listeners.active_count(), 1);

        client.push_event("live.eth", SubplebbitEvent::Update).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(store.get_post("QmNew").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn error_event_marks_queue_item_failed() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(MockForumClient::new().with_forum(forum_with_newest("QmNew", "hi")));
        let listeners = listeners(store.clone(), client.clone(), None, false);

        store.enqueue("live.eth").await.unwrap();
        listeners.ensure_listening("live.eth").await.unwrap();

        client
            .push_event("live.eth", SubplebbitEvent::Error("connection reset".into()))
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let item = store.get_queue_item("live.eth").await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.last_error.as_deref(), Some("connection reset"));
    }

    #[tokio::test]
    async fn listener_is_started_once_per_address() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(MockForumClient::new().with_forum(forum_with_newest("QmNew", "hi")));
        let listeners = listeners(store, client.clone(), None, false);

        listeners.ensure_listening("live.eth").await.unwrap();
        listeners.ensure_listening("live.eth").await.unwrap();

        assert_eq!(listeners.active_count(), 1);
        assert_eq!(client.get_subplebbit_calls().len(), 1);
    }

    #[tokio::test]
    async fn update_moderation_runs_synchronously_when_enabled() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(MockForumClient::new().with_forum(forum_with_newest(
            "QmThreat",
            "violent content",
        )));

        let classifier = MockClassifier::new()
            .script(
                "model-a",
                vec![MockOutcome::Verdict(classifier_client::Verdict {
                    category: ModerationCategory::Violence,
                    reason: "threat".into(),
                    harm: 9,
                })],
            )
            .script(
                "model-b",
                vec![MockOutcome::Verdict(classifier_client::Verdict {
                    category: ModerationCategory::Violence,
                    reason: "threat".into(),
                    harm: 8,
                })],
            );
        let moderator = Arc::new(Moderator::new(
            store.clone(),
            Arc::new(classifier),
            vec!["model-a".to_string(), "model-b".to_string()],
        ));

        let listeners = listeners(store.clone(), client.clone(), Some(moderator), true);
        listeners.ensure_listening("live.eth").await.unwrap();

        client.push_event("live.eth", SubplebbitEvent::Update).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let flagged = store.get_flagged("QmThreat").await.unwrap().unwrap();
        assert_eq!(flagged.category, ModerationCategory::Violence);
        assert!(store.get_post("QmThreat").await.unwrap().is_some());
    }
}
