//! Testing utilities: an in-memory store and a scripted classifier.
//!
//! `MemoryStore` implements the full [`IndexStore`] contract (conditional
//! claims, oldest-first batches, snapshot re-insert semantics) so component
//! logic can be exercised without a database.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use classifier_client::{ClassifierError, Verdict};

use crate::error::Result;
use crate::traits::{Classify, IndexStore};
use crate::types::*;

#[derive(Default)]
struct MemoryInner {
    posts: HashMap<String, Post>,
    post_order: HashMap<String, u64>,
    known: HashMap<String, KnownSubplebbit>,
    queue: HashMap<String, QueueItem>,
    queue_order: HashMap<String, u64>,
    flagged: HashMap<String, FlaggedPost>,
    clock: u64,
}

impl MemoryInner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// In-memory [`IndexStore`] implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct read access for assertions.
    pub fn post_count(&self) -> usize {
        self.inner.lock().unwrap().posts.len()
    }

    pub fn known_count(&self) -> usize {
        self.inner.lock().unwrap().known.len()
    }

    pub fn flagged_count(&self) -> usize {
        self.inner.lock().unwrap().flagged.len()
    }

    pub fn known_title(&self, address: &str) -> Option<String> {
        self.inner
            .lock()
            .unwrap()
            .known
            .get(address)
            .and_then(|k| k.title.clone())
    }

    /// Seed a known forum with an explicit `last_seen_at` (for eviction
    /// tests).
    pub fn seed_known(&self, address: &str, source: DiscoverySource, last_seen_at: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap();
        inner.known.insert(
            address.to_string(),
            KnownSubplebbit {
                address: address.to_string(),
                source,
                discovered_at: last_seen_at,
                last_seen_at,
                title: None,
                tags: Vec::new(),
            },
        );
    }

    /// Force a queue row into a given status (crash simulation).
    pub fn set_queue_status(&self, address: &str, status: QueueStatus) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(item) = inner.queue.get_mut(address) {
            item.status = status;
        }
    }
}

#[async_trait]
impl IndexStore for MemoryStore {
    async fn upsert_known_subplebbit(
        &self,
        address: &str,
        source: DiscoverySource,
        tags: &[String],
    ) -> Result<UpsertOutcome> {
        let mut inner = self.inner.lock().unwrap();
        let now = Utc::now();
        match inner.known.get_mut(address) {
            Some(existing) => {
                existing.last_seen_at = now;
                existing.tags = tags.to_vec();
                Ok(UpsertOutcome { was_inserted: false })
            }
            None => {
                inner.known.insert(
                    address.to_string(),
                    KnownSubplebbit {
                        address: address.to_string(),
                        source,
                        discovered_at: now,
                        last_seen_at: now,
                        title: None,
                        tags: tags.to_vec(),
                    },
                );
                Ok(UpsertOutcome { was_inserted: true })
            }
        }
    }

    async fn update_known_title(&self, address: &str, title: Option<&str>) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(known) = inner.known.get_mut(address) {
            if let Some(title) = title {
                known.title = Some(title.to_string());
            }
            known.last_seen_at = Utc::now();
        }
        Ok(())
    }

    async fn list_known_addresses(&self) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        let mut addresses: Vec<_> = inner.known.keys().cloned().collect();
        addresses.sort();
        Ok(addresses)
    }

    async fn purge_invalid_known(&self) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.known.len();
        inner.known.retain(|address, _| !address.trim().is_empty());
        Ok((before - inner.known.len()) as u64)
    }

    async fn purge_known_not_seen_since(
        &self,
        source: DiscoverySource,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.known.len();
        inner
            .known
            .retain(|_, k| k.source != source || k.last_seen_at >= cutoff);
        Ok((before - inner.known.len()) as u64)
    }

    async fn enqueue(&self, address: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        if inner.queue.contains_key(address) {
            return Ok(false);
        }
        let order = inner.tick();
        inner.queue.insert(
            address.to_string(),
            QueueItem {
                address: address.to_string(),
                status: QueueStatus::Queued,
                last_success_at: None,
                last_failure_at: None,
                success_count: 0,
                failure_count: 0,
                run_count: 0,
                last_error: None,
                updated_at: Utc::now(),
            },
        );
        inner.queue_order.insert(address.to_string(), order);
        Ok(true)
    }

    async fn queued_batch(&self, limit: i64) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        let mut queued: Vec<_> = inner
            .queue
            .values()
            .filter(|item| item.status == QueueStatus::Queued)
            .map(|item| {
                let order = inner.queue_order.get(&item.address).copied().unwrap_or(0);
                (order, item.address.clone())
            })
            .collect();
        queued.sort();
        Ok(queued
            .into_iter()
            .take(limit as usize)
            .map(|(_, address)| address)
            .collect())
    }

    async fn claim(&self, address: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let order = inner.tick();
        match inner.queue.get_mut(address) {
            Some(item) if item.status == QueueStatus::Queued => {
                item.status = QueueStatus::Processing;
                item.run_count += 1;
                item.updated_at = Utc::now();
                inner.queue_order.insert(address.to_string(), order);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_stuck(&self) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut released = 0;
        for item in inner.queue.values_mut() {
            if item.status == QueueStatus::Processing {
                item.status = QueueStatus::Queued;
                item.updated_at = Utc::now();
                released += 1;
            }
        }
        Ok(released)
    }

    async fn processing_count(&self) -> Result<i64> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .queue
            .values()
            .filter(|item| item.status == QueueStatus::Processing)
            .count() as i64)
    }

    async fn addresses_missing_from_queue(&self) -> Result<Vec<String>> {
        let inner = self.inner.lock().unwrap();
        let mut missing: Vec<_> = inner
            .known
            .keys()
            .filter(|address| !inner.queue.contains_key(*address))
            .cloned()
            .collect();
        missing.sort();
        Ok(missing)
    }

    async fn record_success(&self, address: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(item) = inner.queue.get_mut(address) {
            item.status = QueueStatus::Success;
            item.success_count += 1;
            item.last_success_at = Some(Utc::now());
            item.last_error = None;
            item.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn record_failure(&self, address: &str, error: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(item) = inner.queue.get_mut(address) {
            item.status = QueueStatus::Failed;
            item.failure_count += 1;
            item.last_failure_at = Some(Utc::now());
            item.last_error = Some(error.to_string());
            item.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn retry_failed(&self, address: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        let order = inner.tick();
        match inner.queue.get_mut(address) {
            Some(item) if item.status == QueueStatus::Failed => {
                item.status = QueueStatus::Queued;
                item.updated_at = Utc::now();
                inner.queue_order.insert(address.to_string(), order);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_queue_item(&self, address: &str) -> Result<Option<QueueItem>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.queue.get(address).cloned())
    }

    async fn list_queue(&self) -> Result<Vec<QueueItem>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.queue.values().cloned().collect())
    }

    async fn index_posts(&self, posts: &[Post]) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let mut written = 0;
        for post in posts {
            // Snapshot semantics with the moderation stamp carried over.
            let prior_moderated_at = inner.posts.remove(&post.cid).and_then(|p| p.moderated_at);
            let mut fresh = post.clone();
            fresh.moderated_at = prior_moderated_at.or(post.moderated_at);
            let order = inner.tick();
            inner.post_order.insert(post.cid.clone(), order);
            inner.posts.insert(post.cid.clone(), fresh);
            written += 1;
        }
        Ok(written)
    }

    async fn get_post(&self, cid: &str) -> Result<Option<Post>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.posts.get(cid).cloned())
    }

    async fn query_posts(&self, query: &PostQuery) -> Result<Vec<Post>> {
        let inner = self.inner.lock().unwrap();
        let matches_search = |post: &Post| match &query.search {
            None => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                post.content
                    .as_deref()
                    .map(|c| c.to_lowercase().contains(&needle))
                    .unwrap_or(false)
                    || post
                        .title
                        .as_deref()
                        .map(|t| t.to_lowercase().contains(&needle))
                        .unwrap_or(false)
            }
        };

        let mut posts: Vec<_> = inner
            .posts
            .values()
            .filter(|p| {
                query
                    .subplebbit
                    .as_deref()
                    .map(|s| p.subplebbit_address == s)
                    .unwrap_or(true)
                    && query.since.map(|s| p.timestamp >= s).unwrap_or(true)
                    && query.until.map(|u| p.timestamp <= u).unwrap_or(true)
                    && matches_search(p)
            })
            .cloned()
            .collect();

        match query.sort {
            PostSort::NewestFirst => posts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp)),
            PostSort::OldestFirst => posts.sort_by(|a, b| a.timestamp.cmp(&b.timestamp)),
            PostSort::MostUpvoted => posts.sort_by(|a, b| b.upvote_count.cmp(&a.upvote_count)),
        }

        Ok(posts
            .into_iter()
            .skip(query.offset as usize)
            .take(query.limit as usize)
            .collect())
    }

    async fn delete_post(&self, cid: &str) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        Ok(inner.posts.remove(cid).is_some())
    }

    async fn unmoderated_posts(&self, limit: i64) -> Result<Vec<Post>> {
        let inner = self.inner.lock().unwrap();
        let mut unmoderated: Vec<_> = inner
            .posts
            .values()
            .filter(|p| p.moderated_at.is_none())
            .map(|p| {
                let order = inner.post_order.get(&p.cid).copied().unwrap_or(0);
                (order, p.clone())
            })
            .collect();
        unmoderated.sort_by_key(|(order, _)| *order);
        Ok(unmoderated
            .into_iter()
            .take(limit as usize)
            .map(|(_, p)| p)
            .collect())
    }

    async fn mark_moderated(&self, cid: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(post) = inner.posts.get_mut(cid) {
            if post.moderated_at.is_none() {
                post.moderated_at = Some(Utc::now());
            }
        }
        Ok(())
    }

    async fn deindex_exclusions(&self) -> Result<Exclusions> {
        let inner = self.inner.lock().unwrap();
        let mut exclusions = Exclusions::default();
        for flagged in inner.flagged.values() {
            match flagged.status {
                FlagAction::DeindexedComment => {
                    exclusions.cids.insert(flagged.post.cid.clone());
                }
                FlagAction::DeindexedAuthor => {
                    exclusions.authors.insert(flagged.post.author_address.clone());
                }
                FlagAction::DeindexedSubplebbit => {
                    exclusions
                        .subplebbits
                        .insert(flagged.post.subplebbit_address.clone());
                }
                FlagAction::Pending | FlagAction::Ignored => {}
            }
        }
        Ok(exclusions)
    }

    async fn insert_flagged(&self, flagged: &FlaggedPost) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .flagged
            .entry(flagged.post.cid.clone())
            .or_insert_with(|| flagged.clone());
        Ok(())
    }

    async fn get_flagged(&self, cid: &str) -> Result<Option<FlaggedPost>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.flagged.get(cid).cloned())
    }

    async fn list_flagged(&self, status: Option<FlagAction>) -> Result<Vec<FlaggedPost>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .flagged
            .values()
            .filter(|f| status.map(|s| f.status == s).unwrap_or(true))
            .cloned()
            .collect())
    }

    async fn set_flag_status(&self, cid: &str, status: FlagAction) -> Result<bool> {
        let mut inner = self.inner.lock().unwrap();
        match inner.flagged.get_mut(cid) {
            Some(flagged) => {
                flagged.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

/// A scripted [`Classify`] implementation. Each model name maps to a queue of
/// outcomes consumed call by call (the last one repeats).
#[derive(Default)]
pub struct MockClassifier {
    scripts: Mutex<HashMap<String, Vec<MockOutcome>>>,
    calls: Mutex<Vec<String>>,
}

pub enum MockOutcome {
    Verdict(Verdict),
    RateLimited(std::time::Duration),
    Fail(String),
}

impl MockClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(self, model: &str, outcomes: Vec<MockOutcome>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(model.to_string(), outcomes);
        self
    }

    /// Model names in call order, for assertions.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Classify for MockClassifier {
    async fn classify(&self, model: &str, _text: &str) -> classifier_client::Result<Verdict> {
        self.calls.lock().unwrap().push(model.to_string());

        let outcome = {
            let mut scripts = self.scripts.lock().unwrap();
            let queue = scripts.get_mut(model);
            match queue {
                Some(queue) if queue.len() > 1 => Some(queue.remove(0)),
                Some(queue) => queue.first().map(|o| match o {
                    MockOutcome::Verdict(v) => MockOutcome::Verdict(v.clone()),
                    MockOutcome::RateLimited(d) => MockOutcome::RateLimited(*d),
                    MockOutcome::Fail(m) => MockOutcome::Fail(m.clone()),
                }),
                None => None,
            }
        };

        match outcome {
            Some(MockOutcome::Verdict(v)) => Ok(v),
            Some(MockOutcome::RateLimited(retry_after)) => {
                Err(ClassifierError::RateLimited { retry_after })
            }
            Some(MockOutcome::Fail(message)) => Err(ClassifierError::Api {
                status: 500,
                message,
            }),
            None => Err(ClassifierError::Api {
                status: 500,
                message: format!("no script for model {model}"),
            }),
        }
    }
}
