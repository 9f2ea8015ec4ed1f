//! Testing utilities including a mock forum client.
//!
//! Useful for exercising crawl/index logic without a running gateway. Forums
//! are registered up front, pages are served from memory, and update events
//! can be injected at will.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{PlebbitError, Result};
use crate::types::{Page, PageSet, Subplebbit, SubplebbitEvent};
use crate::{ForumClient, ForumHandle};

/// A scripted forum for tests.
pub struct MockForum {
    pub subplebbit: Subplebbit,
    pub pages: HashMap<String, Page>,
}

impl MockForum {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            subplebbit: Subplebbit {
                address: address.into(),
                title: None,
                posts: None,
                updated_at: None,
            },
            pages: HashMap::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.subplebbit.title = Some(title.into());
        self
    }

    /// Register a fetchable page cid under a sort type.
    pub fn with_page_cid(mut self, sort: impl Into<String>, cid: impl Into<String>) -> Self {
        self.subplebbit
            .posts
            .get_or_insert_with(|| PageSet {
                pages: HashMap::new(),
                page_cids: HashMap::new(),
            })
            .page_cids
            .insert(sort.into(), cid.into());
        self
    }

    /// Register a page body by cid.
    pub fn with_page(mut self, cid: impl Into<String>, page: Page) -> Self {
        self.pages.insert(cid.into(), page);
        self
    }
}

struct ForumState {
    forum: MockForum,
    subscribers: Vec<mpsc::Sender<SubplebbitEvent>>,
}

#[derive(Default)]
struct MockState {
    forums: HashMap<String, ForumState>,
    get_subplebbit_calls: Vec<String>,
    get_page_calls: Vec<String>,
}

/// In-memory [`ForumClient`] implementation.
#[derive(Clone, Default)]
pub struct MockForumClient {
    state: Arc<Mutex<MockState>>,
}

impl MockForumClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_forum(self, forum: MockForum) -> Self {
        self.state.lock().unwrap().forums.insert(
            forum.subplebbit.address.clone(),
            ForumState {
                forum,
                subscribers: Vec::new(),
            },
        );
        self
    }

    /// Replace a forum's scripted content (for re-crawl scenarios).
    pub fn set_forum(&self, forum: MockForum) {
        let mut state = self.state.lock().unwrap();
        let address = forum.subplebbit.address.clone();
        match state.forums.get_mut(&address) {
            Some(existing) => existing.forum = forum,
            None => {
                state.forums.insert(
                    address,
                    ForumState {
                        forum,
                        subscribers: Vec::new(),
                    },
                );
            }
        }
    }

    /// Deliver an event to every live subscription of `address`.
    pub async fn push_event(&self, address: &str, event: SubplebbitEvent) {
        let senders: Vec<_> = {
            let state = self.state.lock().unwrap();
            state
                .forums
                .get(address)
                .map(|f| f.subscribers.clone())
                .unwrap_or_default()
        };
        for sender in senders {
            let _ = sender.send(event.clone()).await;
        }
    }

    pub fn get_subplebbit_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().get_subplebbit_calls.clone()
    }

    pub fn get_page_calls(&self) -> Vec<String> {
        self.state.lock().unwrap().get_page_calls.clone()
    }
}

#[async_trait]
impl ForumClient for MockForumClient {
    type Handle = MockForumHandle;

    async fn get_subplebbit(&self, address: &str) -> Result<MockForumHandle> {
        let mut state = self.state.lock().unwrap();
        state.get_subplebbit_calls.push(address.to_string());

        let forum = state
            .forums
            .get(address)
            .ok_or_else(|| PlebbitError::NotFound {
                address: address.to_string(),
            })?;

        Ok(MockForumHandle {
            client: self.clone(),
            subplebbit: forum.forum.subplebbit.clone(),
        })
    }
}

/// Handle served by [`MockForumClient`].
pub struct MockForumHandle {
    client: MockForumClient,
    subplebbit: Subplebbit,
}

#[async_trait]
impl ForumHandle for MockForumHandle {
    fn address(&self) -> &str {
        &self.subplebbit.address
    }

    fn title(&self) -> Option<String> {
        self.subplebbit.title.clone()
    }

    fn preloaded_page(&self, sort: &str) -> Option<Page> {
        self.subplebbit
            .posts
            .as_ref()
            .and_then(|posts| posts.pages.get(sort).cloned())
    }

    fn page_cid(&self, sort: &str) -> Option<String> {
        self.subplebbit
            .posts
            .as_ref()
            .and_then(|posts| posts.page_cids.get(sort).cloned())
    }

    async fn get_page(&self, cid: &str) -> Result<Page> {
        let mut state = self.client.state.lock().unwrap();
        state.get_page_calls.push(cid.to_string());

        state
            .forums
            .get(&self.subplebbit.address)
            .and_then(|f| f.forum.pages.get(cid).cloned())
            .ok_or_else(|| PlebbitError::Api {
                status: 404,
                message: format!("unknown page cid {}", cid),
            })
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<SubplebbitEvent>> {
        let (tx, rx) = mpsc::channel(16);
        let mut state = self.client.state.lock().unwrap();
        if let Some(forum) = state.forums.get_mut(&self.subplebbit.address) {
            forum.subscribers.push(tx);
        }
        Ok(rx)
    }
}
