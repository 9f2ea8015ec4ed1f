//! Durable data model: posts, known forums, queue items and flagged posts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use classifier_client::{ModerationCategory, Verdict};
use plebbit_client::Comment;

// ============================================================================
// ENUMS (type-safe states)
// ============================================================================

/// Which feeder first reported a forum address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoverySource {
    Github,
    Dune,
}

impl DiscoverySource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiscoverySource::Github => "github",
            DiscoverySource::Dune => "dune",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "github" => Some(DiscoverySource::Github),
            "dune" => Some(DiscoverySource::Dune),
            _ => None,
        }
    }
}

/// Crawl-queue lifecycle. Transitions are driven solely by the queue
/// processor (plus an explicit admin retry for `failed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Queued,
    Processing,
    Success,
    Failed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Queued => "queued",
            QueueStatus::Processing => "processing",
            QueueStatus::Success => "success",
            QueueStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(QueueStatus::Queued),
            "processing" => Some(QueueStatus::Processing),
            "success" => Some(QueueStatus::Success),
            "failed" => Some(QueueStatus::Failed),
            _ => None,
        }
    }
}

/// Moderation status of a flagged post. `deindexed_*` statuses exclude the
/// comment/author/forum from future indexing; the historical post row is only
/// removed by an explicit deletion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagAction {
    Pending,
    Ignored,
    DeindexedComment,
    DeindexedAuthor,
    DeindexedSubplebbit,
}

impl FlagAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagAction::Pending => "pending",
            FlagAction::Ignored => "ignored",
            FlagAction::DeindexedComment => "deindexed_comment",
            FlagAction::DeindexedAuthor => "deindexed_author",
            FlagAction::DeindexedSubplebbit => "deindexed_subplebbit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(FlagAction::Pending),
            "ignored" => Some(FlagAction::Ignored),
            "deindexed_comment" => Some(FlagAction::DeindexedComment),
            "deindexed_author" => Some(FlagAction::DeindexedAuthor),
            "deindexed_subplebbit" => Some(FlagAction::DeindexedSubplebbit),
            _ => None,
        }
    }
}

/// What produced a flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagSource {
    Cascade,
    Report,
}

impl FlagSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlagSource::Cascade => "cascade",
            FlagSource::Report => "report",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cascade" => Some(FlagSource::Cascade),
            "report" => Some(FlagSource::Report),
            _ => None,
        }
    }
}

// ============================================================================
// CORE TYPES
// ============================================================================

/// A forum submission or reply, keyed by its network-assigned cid.
///
/// Crawl results are authoritative snapshots: re-indexing deletes and
/// reinserts by cid rather than appending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub cid: String,
    pub timestamp: i64,
    pub title: Option<String>,
    pub content: Option<String>,
    pub subplebbit_address: String,
    pub author_address: String,
    pub author_display_name: Option<String>,
    pub upvote_count: i64,
    pub downvote_count: i64,
    pub reply_count: i64,
    pub parent_cid: Option<String>,
    pub post_cid: Option<String>,
    pub depth: i32,
    /// Origin payload, preserved verbatim for audit/download.
    pub raw: serde_json::Value,
    pub moderated_at: Option<DateTime<Utc>>,
}

impl Post {
    pub fn is_top_level(&self) -> bool {
        self.parent_cid.is_none()
    }

    /// Build a top-level post from a fetched comment. `post_cid` is the
    /// comment's own cid and depth is 0.
    pub fn from_top_level(comment: &Comment, subplebbit_address: &str) -> Self {
        Self::from_comment(comment, subplebbit_address, None, &comment.cid, 0)
    }

    /// Build a reply annotated with its immediate parent and its top-level
    /// ancestor.
    pub fn from_reply(
        comment: &Comment,
        subplebbit_address: &str,
        parent_cid: &str,
        post_cid: &str,
        depth: i32,
    ) -> Self {
        Self::from_comment(comment, subplebbit_address, Some(parent_cid), post_cid, depth)
    }

    fn from_comment(
        comment: &Comment,
        subplebbit_address: &str,
        parent_cid: Option<&str>,
        post_cid: &str,
        depth: i32,
    ) -> Self {
        Post {
            cid: comment.cid.clone(),
            timestamp: comment.timestamp,
            title: comment.title.clone(),
            content: comment.content.clone(),
            subplebbit_address: subplebbit_address.to_string(),
            author_address: comment.author.address.clone(),
            author_display_name: comment.author.display_name.clone(),
            upvote_count: comment.upvote_count,
            downvote_count: comment.downvote_count,
            reply_count: comment.reply_count,
            parent_cid: parent_cid.map(|s| s.to_string()),
            post_cid: Some(post_cid.to_string()),
            depth,
            raw: serde_json::to_value(comment).unwrap_or(serde_json::Value::Null),
            moderated_at: None,
        }
    }
}

/// A forum address the discovery sources have reported.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownSubplebbit {
    pub address: String,
    pub source: DiscoverySource,
    pub discovered_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub title: Option<String>,
    pub tags: Vec<String>,
}

/// A per-forum unit of crawl work. Never deleted while the address remains
/// known.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueItem {
    pub address: String,
    pub status: QueueStatus,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub success_count: i64,
    pub failure_count: i64,
    pub run_count: i64,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A copy of a post taken at flag time (soft-flag model: the original post
/// row is untouched until an admin acts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlaggedPost {
    pub post: Post,
    pub reason: String,
    pub harm_score: i32,
    pub category: ModerationCategory,
    pub flag_source: FlagSource,
    pub flagged_at: DateTime<Utc>,
    pub status: FlagAction,
}

impl FlaggedPost {
    pub fn from_verdict(post: &Post, verdict: &Verdict, source: FlagSource) -> Self {
        FlaggedPost {
            post: post.clone(),
            reason: verdict.reason.clone(),
            harm_score: verdict.harm,
            category: verdict.category,
            flag_source: source,
            flagged_at: Utc::now(),
            status: FlagAction::Pending,
        }
    }
}

// ============================================================================
// RESULTS & QUERIES
// ============================================================================

#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub was_inserted: bool,
}

/// What a discovery run observed.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryOutcome {
    pub new_addresses: Vec<String>,
    pub refreshed: usize,
    pub skipped_invalid: usize,
}

/// Cids, authors and forums excluded from future indexing by moderation
/// actions.
#[derive(Debug, Clone, Default)]
pub struct Exclusions {
    pub cids: std::collections::HashSet<String>,
    pub authors: std::collections::HashSet<String>,
    pub subplebbits: std::collections::HashSet<String>,
}

/// Sort order for read queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostSort {
    NewestFirst,
    OldestFirst,
    MostUpvoted,
}

/// Read-side filter over indexed posts (consumed by the external REST
/// façade). Substring matching on title/content suffices.
#[derive(Debug, Clone)]
pub struct PostQuery {
    pub search: Option<String>,
    pub subplebbit: Option<String>,
    pub since: Option<i64>,
    pub until: Option<i64>,
    pub sort: PostSort,
    pub limit: i64,
    pub offset: i64,
}

impl Default for PostQuery {
    fn default() -> Self {
        PostQuery {
            search: None,
            subplebbit: None,
            since: None,
            until: None,
            sort: PostSort::NewestFirst,
            limit: 50,
            offset: 0,
        }
    }
}
