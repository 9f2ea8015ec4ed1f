//! Fetching and indexing of forum content.
//!
//! A full crawl follows the "new" page cursor until exhausted. An
//! incremental crawl (triggered by an update notification) considers only
//! the single newest top-level post: history is re-established by periodic
//! full crawls while push updates optimize for latency. This assumes the
//! origin surfaces the newest item first; when an origin's ordering is
//! unstable, older items can be missed between full crawls (known
//! limitation).

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use plebbit_client::{Comment, ForumClient, ForumHandle, Page};

use crate::error::{IndexerError, Result};
use crate::flatten::flatten_replies;
use crate::traits::IndexStore;
use crate::types::{Exclusions, Post};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlMode {
    Full,
    Incremental,
}

/// What one indexing pass did.
#[derive(Debug, Default)]
pub struct IndexReport {
    /// Posts written in this pass (top-level and replies).
    pub indexed: Vec<Post>,
    pub written: u64,
    pub skipped_invalid: usize,
    pub skipped_blacklisted: usize,
    pub skipped_deindexed: usize,
    /// The forum itself was excluded; nothing was fetched.
    pub skipped_forum: bool,
}

pub struct Indexer<S, C> {
    store: Arc<S>,
    client: Arc<C>,
    blacklisted_subplebbits: HashSet<String>,
    blacklisted_authors: HashSet<String>,
    fetch_timeout: Duration,
}

impl<S, C> Indexer<S, C>
where
    S: IndexStore,
    C: ForumClient,
{
    pub fn new(
        store: Arc<S>,
        client: Arc<C>,
        blacklisted_subplebbits: HashSet<String>,
        blacklisted_authors: HashSet<String>,
        fetch_timeout: Duration,
    ) -> Self {
        Self {
            store,
            client,
            blacklisted_subplebbits,
            blacklisted_authors,
            fetch_timeout,
        }
    }

    /// Crawl one forum and persist its content.
    pub async fn index_subplebbit(&self, address: &str, mode: CrawlMode) -> Result<IndexReport> {
        let mut report = IndexReport::default();

        if self.blacklisted_subplebbits.contains(address) {
            tracing::info!(address, "Subplebbit is blacklisted, skipping");
            report.skipped_forum = true;
            return Ok(report);
        }

        let exclusions = self.store.deindex_exclusions().await?;
        if exclusions.subplebbits.contains(address) {
            tracing::info!(address, "Subplebbit is deindexed, skipping");
            report.skipped_forum = true;
            return Ok(report);
        }

        let handle = self
            .with_timeout(self.client.get_subplebbit(address))
            .await?;

        let top_level = self.fetch_top_level(&handle, mode).await?;
        tracing::info!(
            address,
            count = top_level.len(),
            mode = ?mode,
            "Fetched top-level posts"
        );

        // Top-level posts first; their replies reference them by post_cid.
        let mut batch = Vec::new();
        for comment in &top_level {
            if self.blacklisted_authors.contains(&comment.author.address) {
                report.skipped_blacklisted += 1;
                continue;
            }
            self.admit(Post::from_top_level(comment, address), &exclusions, &mut batch, &mut report);
        }
        if !batch.is_empty() {
            report.written += self.store.index_posts(&batch).await?;
            report.indexed.extend(batch);
        }

        for comment in &top_level {
            let mut reply_batch = Vec::new();
            for post in flatten_replies(comment, address) {
                if self.blacklisted_authors.contains(&post.author_address) {
                    report.skipped_blacklisted += 1;
                    continue;
                }
                self.admit(post, &exclusions, &mut reply_batch, &mut report);
            }
            if !reply_batch.is_empty() {
                report.written += self.store.index_posts(&reply_batch).await?;
                report.indexed.extend(reply_batch);
            }
        }

        self.store
            .update_known_title(address, handle.title().as_deref())
            .await?;

        Ok(report)
    }

    fn admit(
        &self,
        post: Post,
        exclusions: &Exclusions,
        batch: &mut Vec<Post>,
        report: &mut IndexReport,
    ) {
        if let Err(reason) = validate_post(&post) {
            tracing::warn!(cid = %post.cid, reason, "Skipping invalid post");
            report.skipped_invalid += 1;
            return;
        }
        if exclusions.cids.contains(&post.cid) || exclusions.authors.contains(&post.author_address)
        {
            report.skipped_deindexed += 1;
            return;
        }
        batch.push(post);
    }

    async fn fetch_top_level(&self, handle: &C::Handle, mode: CrawlMode) -> Result<Vec<Comment>> {
        let first = match handle.preloaded_page("new") {
            Some(page) => Some(page),
            None => match handle.page_cid("new") {
                Some(cid) => Some(self.with_timeout(handle.get_page(&cid)).await?),
                None => None,
            },
        };

        let Some(mut page) = first else {
            return Ok(Vec::new());
        };

        match mode {
            CrawlMode::Incremental => Ok(page.comments.into_iter().take(1).collect()),
            CrawlMode::Full => {
                let mut all = Vec::new();
                loop {
                    let Page { comments, next_cid } = page;
                    all.extend(comments);
                    match next_cid {
                        Some(cid) => page = self.with_timeout(handle.get_page(&cid)).await?,
                        None => break,
                    }
                }
                Ok(all)
            }
        }
    }

    /// Convert a hung network call into a reported failure instead of
    /// blocking the scheduler.
    async fn with_timeout<T>(
        &self,
        fut: impl Future<Output = plebbit_client::Result<T>>,
    ) -> Result<T> {
        match tokio::time::timeout(self.fetch_timeout, fut).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(IndexerError::Timeout(self.fetch_timeout)),
        }
    }
}

/// Candidate validation for the write path. Invalid posts are skipped and
/// counted, never fatal to the batch.
fn validate_post(post: &Post) -> std::result::Result<(), &'static str> {
    if post.cid.trim().is_empty() {
        return Err("missing cid");
    }
    if post.subplebbit_address.trim().is_empty() {
        return Err("missing subplebbit address");
    }
    if post.parent_cid.is_none() && post.title.is_none() {
        return Err("top-level post without title");
    }
    if post.parent_cid.is_some() && post.post_cid.is_none() {
        return Err("reply without post cid");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use plebbit_client::testing::{MockForum, MockForumClient};
    use plebbit_client::{Author, Replies};

    use crate::testing::MemoryStore;
    use crate::types::{FlagAction, FlagSource, FlaggedPost, ModerationCategory, PostQuery};

    fn comment(cid: &str, author: &str, title: Option<&str>) -> Comment {
        Comment {
            cid: cid.to_string(),
            timestamp: 1_700_000_000,
            title: title.map(|t| t.to_string()),
            content: Some(format!("content of {cid}")),
            author: Author {
                address: author.to_string(),
                display_name: None,
            },
            upvote_count: 1,
            downvote_count: 0,
            reply_count: 0,
            parent_cid: None,
            post_cid: None,
            depth: None,
            replies: None,
            extra: serde_json::Map::new(),
        }
    }

    fn page(comments: Vec<Comment>, next_cid: Option<&str>) -> Page {
        Page {
            comments,
            next_cid: next_cid.map(|s| s.to_string()),
        }
    }

    fn two_page_forum() -> MockForum {
        // 3 posts on page one, 2 on page two, one reply under the first post.
        let mut first = comment("QmP1", "alice.eth", Some("first"));
        first.replies = Some(Replies::Flat(vec![comment("QmR1", "bob.eth", None)]));

        MockForum::new("memes.eth")
            .with_title("Memes")
            .with_page_cid("new", "QmPageOne")
            .with_page(
                "QmPageOne",
                page(
                    vec![
                        first,
                        comment("QmP2", "bob.eth", Some("second")),
                        comment("QmP3", "carol.eth", Some("third")),
                    ],
                    Some("QmPageTwo"),
                ),
            )
            .with_page(
                "QmPageTwo",
                page(
                    vec![
                        comment("QmP4", "dave.eth", Some("fourth")),
                        comment("QmP5", "erin.eth", Some("fifth")),
                    ],
                    None,
                ),
            )
    }

    fn indexer(
        store: Arc<MemoryStore>,
        client: Arc<MockForumClient>,
    ) -> Indexer<MemoryStore, MockForumClient> {
        Indexer::new(
            store,
            client,
            HashSet::new(),
            HashSet::new(),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn full_crawl_follows_pagination_and_indexes_replies() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(MockForumClient::new().with_forum(two_page_forum()));

        let report = indexer(store.clone(), client)
            .index_subplebbit("memes.eth", CrawlMode::Full)
            .await
            .unwrap();

        assert_eq!(report.written, 6);
        assert_eq!(store.post_count(), 6);

        let reply = store.get_post("QmR1").await.unwrap().unwrap();
        assert_eq!(reply.parent_cid.as_deref(), Some("QmP1"));
        assert_eq!(reply.post_cid.as_deref(), Some("QmP1"));
        assert_eq!(reply.depth, 1);
    }

    #[tokio::test]
    async fn reindexing_unchanged_content_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(MockForumClient::new().with_forum(two_page_forum()));
        let indexer = indexer(store.clone(), client);

        indexer
            .index_subplebbit("memes.eth", CrawlMode::Full)
            .await
            .unwrap();
        let first_pass: Vec<_> = store.query_posts(&PostQuery::default()).await.unwrap();

        indexer
            .index_subplebbit("memes.eth", CrawlMode::Full)
            .await
            .unwrap();
        let second_pass: Vec<_> = store.query_posts(&PostQuery::default()).await.unwrap();

        assert_eq!(first_pass.len(), 6);
        assert_eq!(second_pass.len(), 6);
        for (a, b) in first_pass.iter().zip(second_pass.iter()) {
            assert_eq!(a.cid, b.cid);
            assert_eq!(a.content, b.content);
            assert_eq!(a.parent_cid, b.parent_cid);
        }
    }

    #[tokio::test]
    async fn incremental_crawl_takes_only_the_newest_post() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(MockForumClient::new().with_forum(two_page_forum()));

        let report = indexer(store.clone(), client)
            .index_subplebbit("memes.eth", CrawlMode::Incremental)
            .await
            .unwrap();

        // Newest top-level post plus its one reply.
        assert_eq!(report.written, 2);
        assert!(store.get_post("QmP1").await.unwrap().is_some());
        assert!(store.get_post("QmP2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn blacklisted_author_posts_are_not_indexed() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(MockForumClient::new().with_forum(two_page_forum()));

        let mut blacklisted_authors = HashSet::new();
        blacklisted_authors.insert("bob.eth".to_string());

        let indexer = Indexer::new(
            store.clone(),
            client,
            HashSet::new(),
            blacklisted_authors,
            Duration::from_secs(5),
        );

        let report = indexer
            .index_subplebbit("memes.eth", CrawlMode::Full)
            .await
            .unwrap();

        // bob.eth authored one top-level post and one reply.
        assert_eq!(report.skipped_blacklisted, 2);
        assert!(store.get_post("QmP2").await.unwrap().is_none());
        assert!(store.get_post("QmR1").await.unwrap().is_none());
        assert_eq!(store.post_count(), 4);
    }

    #[tokio::test]
    async fn blacklisted_forum_is_skipped_without_side_effects() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(MockForumClient::new().with_forum(two_page_forum()));

        let mut blacklisted_subplebbits = HashSet::new();
        blacklisted_subplebbits.insert("memes.eth".to_string());

        let indexer = Indexer::new(
            store.clone(),
            client.clone(),
            blacklisted_subplebbits,
            HashSet::new(),
            Duration::from_secs(5),
        );

        let report = indexer
            .index_subplebbit("memes.eth", CrawlMode::Full)
            .await
            .unwrap();

        assert!(report.skipped_forum);
        assert_eq!(store.post_count(), 0);
        assert!(client.get_subplebbit_calls().is_empty());
    }

    #[tokio::test]
    async fn deindexed_content_is_not_reindexed() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(MockForumClient::new().with_forum(two_page_forum()));
        let indexer = indexer(store.clone(), client);

        indexer
            .index_subplebbit("memes.eth", CrawlMode::Full)
            .await
            .unwrap();

        // Admin deindexes one comment, then the post row is deleted.
        let post = store.get_post("QmP3").await.unwrap().unwrap();
        let verdict = classifier_client::Verdict {
            category: ModerationCategory::HateSpeech,
            reason: "slur".into(),
            harm: 7,
        };
        store
            .insert_flagged(&FlaggedPost::from_verdict(&post, &verdict, FlagSource::Report))
            .await
            .unwrap();
        store
            .set_flag_status("QmP3", FlagAction::DeindexedComment)
            .await
            .unwrap();
        store.delete_post("QmP3").await.unwrap();

        let report = indexer
            .index_subplebbit("memes.eth", CrawlMode::Full)
            .await
            .unwrap();

        assert_eq!(report.skipped_deindexed, 1);
        assert!(store.get_post("QmP3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn invalid_posts_are_counted_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        // A top-level post without a title is invalid; its sibling is fine.
        let forum = MockForum::new("memes.eth")
            .with_page_cid("new", "QmPage")
            .with_page(
                "QmPage",
                page(
                    vec![
                        comment("QmBad", "alice.eth", None),
                        comment("QmGood", "bob.eth", Some("ok")),
                    ],
                    None,
                ),
            );
        let client = Arc::new(MockForumClient::new().with_forum(forum));

        let report = indexer(store.clone(), client)
            .index_subplebbit("memes.eth", CrawlMode::Full)
            .await
            .unwrap();

        assert_eq!(report.skipped_invalid, 1);
        assert_eq!(report.written, 1);
        assert!(store.get_post("QmGood").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn crawl_refreshes_forum_title() {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_known_subplebbit("memes.eth", crate::types::DiscoverySource::Github, &[])
            .await
            .unwrap();
        let client = Arc::new(MockForumClient::new().with_forum(two_page_forum()));

        indexer(store.clone(), client)
            .index_subplebbit("memes.eth", CrawlMode::Full)
            .await
            .unwrap();

        assert_eq!(store.known_title("memes.eth").as_deref(), Some("Memes"));
    }
}
