//! HTTP gateway client for the plebbit peer-to-peer forum network.
//!
//! The network itself is an opaque collaborator: it resolves a forum address
//! to a published record, serves paginated comment pages by cid, and signals
//! when a forum publishes new content. This crate exposes that surface as the
//! [`ForumClient`]/[`ForumHandle`] traits plus a concrete client that talks
//! to a local gateway daemon, so consumers never hold an ambient global
//! connection.
//!
//! # Example
//!
//! ```rust,ignore
//! use plebbit_client::{ForumClient, ForumHandle, PlebbitClient};
//!
//! let client = PlebbitClient::new("http://localhost:9138".into());
//! let handle = client.get_subplebbit("memes.eth").await?;
//! if let Some(cid) = handle.page_cid("new") {
//!     let page = handle.get_page(&cid).await?;
//!     println!("{} comments", page.comments.len());
//! }
//! ```

pub mod error;
pub mod testing;
pub mod types;

pub use error::{PlebbitError, Result};
pub use types::{Author, Comment, Page, PageSet, Replies, Subplebbit, SubplebbitEvent};

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// How often a subscription re-checks the forum record for updates.
const UPDATE_POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Buffered events per subscription before the producer blocks.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Resolves forum addresses to live handles.
#[async_trait]
pub trait ForumClient: Send + Sync {
    type Handle: ForumHandle + Send + 'static;

    async fn get_subplebbit(&self, address: &str) -> Result<Self::Handle>;
}

/// A fetched forum: metadata, page access and a live update subscription.
#[async_trait]
pub trait ForumHandle: Send + Sync {
    fn address(&self) -> &str;

    fn title(&self) -> Option<String>;

    /// Page published inline with the forum record for a sort type.
    fn preloaded_page(&self, sort: &str) -> Option<Page>;

    /// Cid of the separately fetchable page for a sort type.
    fn page_cid(&self, sort: &str) -> Option<String>;

    async fn get_page(&self, cid: &str) -> Result<Page>;

    /// Begin live updates. Events arrive on the returned channel until the
    /// receiver is dropped.
    async fn subscribe(&self) -> Result<mpsc::Receiver<SubplebbitEvent>>;
}

/// Client for a plebbit HTTP gateway daemon.
#[derive(Clone)]
pub struct PlebbitClient {
    client: reqwest::Client,
    base_url: String,
}

impl PlebbitClient {
    pub fn new(base_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    /// Build with a fixed wall-clock budget per gateway call. A hung fetch
    /// surfaces as an error instead of stalling the caller.
    pub fn with_timeout(base_url: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client, base_url }
    }

    async fn fetch_subplebbit(&self, address: &str) -> Result<Subplebbit> {
        let url = format!("{}/api/v0/subplebbit/{}", self.base_url, address);
        let resp = self.client.get(&url).send().await?;

        let status = resp.status();
        if status.as_u16() == 404 {
            return Err(PlebbitError::NotFound {
                address: address.to_string(),
            });
        }
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(PlebbitError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.json().await?)
    }

    async fn fetch_page(&self, address: &str, cid: &str) -> Result<Page> {
        let url = format!("{}/api/v0/subplebbit/{}/page/{}", self.base_url, address, cid);
        let resp = self.client.get(&url).send().await?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(PlebbitError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(resp.json().await?)
    }
}

#[async_trait]
impl ForumClient for PlebbitClient {
    type Handle = GatewayHandle;

    async fn get_subplebbit(&self, address: &str) -> Result<GatewayHandle> {
        let subplebbit = self.fetch_subplebbit(address).await?;
        Ok(GatewayHandle {
            client: self.clone(),
            subplebbit,
        })
    }
}

/// A forum handle backed by the HTTP gateway.
pub struct GatewayHandle {
    client: PlebbitClient,
    subplebbit: Subplebbit,
}

#[async_trait]
impl ForumHandle for GatewayHandle {
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
        self.client.fetch_page(&self.subplebbit.address, cid).await
    }

    async fn subscribe(&self) -> Result<mpsc::Receiver<SubplebbitEvent>> {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let client = self.client.clone();
        let address = self.subplebbit.address.clone();
        let mut last_updated = self.subplebbit.updated_at;

        tokio::spawn(async move {
            loop {
                tokio::time::sleep(UPDATE_POLL_INTERVAL).await;

                match client.fetch_subplebbit(&address).await {
                    Ok(fresh) => {
                        if fresh.updated_at != last_updated {
                            last_updated = fresh.updated_at;
                            if tx.send(SubplebbitEvent::Update).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(address = %address, error = %e, "Subscription poll failed");
                        if tx.send(SubplebbitEvent::Error(e.to_string())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}
