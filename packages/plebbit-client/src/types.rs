//! Wire types for content fetched from the peer-to-peer network.
//!
//! Shapes mirror what the network publishes, so field names are camelCase on
//! the wire. Unknown fields are preserved on comments (`extra`) because the
//! indexer stores the origin payload verbatim.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

/// A forum submission or a reply to one, as published by its origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub cid: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub author: Author,
    #[serde(default)]
    pub upvote_count: i64,
    #[serde(default)]
    pub downvote_count: i64,
    #[serde(default)]
    pub reply_count: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_cid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_cid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replies: Option<Replies>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// One page of comments plus a cursor to the next page.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page {
    pub comments: Vec<Comment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_cid: Option<String>,
}

/// Preloaded pages keyed by sort type, plus cids for pages that must be
/// fetched separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSet {
    pub pages: HashMap<String, Page>,
    #[serde(default)]
    pub page_cids: HashMap<String, String>,
}

/// The three representations a reply tree arrives in. Origins are free to
/// publish any of them, sometimes mixed within one forum, so each variant has
/// its own normalizing function (see the indexer's flattener) and an
/// unrecognized shape fails deserialization instead of silently yielding
/// nothing.
///
/// `PageSet` requires a `pages` field and `Page` a `comments` field, which is
/// what keeps the untagged variants unambiguous.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Replies {
    /// Paginated by sort type: `{ "pages": {...}, "pageCids": {...} }`
    Paginated(PageSet),
    /// A single page object: `{ "comments": [...], "nextCid": ... }`
    Single(Page),
    /// A bare list of comments
    Flat(Vec<Comment>),
}

/// A forum's published record.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subplebbit {
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posts: Option<PageSet>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,
}

/// Events emitted by a live forum subscription.
#[derive(Debug, Clone)]
pub enum SubplebbitEvent {
    /// The forum published new content.
    Update,
    /// The subscription hit an error.
    Error(String),
}
