//! PostgreSQL storage implementation.
//!
//! Schema is bootstrapped with idempotent `CREATE TABLE IF NOT EXISTS`
//! migrations at construction. Queries are runtime-checked `sqlx::query`
//! with explicit binds; enum states are stored as short strings and mapped
//! back through the enums' `parse` helpers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::postgres::PgRow;
use sqlx::Row;

use crate::error::Result;
use crate::traits::IndexStore;
use crate::types::*;

pub struct PostgresIndexStore {
    pool: PgPool,
}

impl PostgresIndexStore {
    /// Connect and run migrations.
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Self::from_pool(pool).await
    }

    /// Build from an existing pool (shared with other services) and run
    /// migrations.
    pub async fn from_pool(pool: PgPool) -> Result<Self> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                cid TEXT PRIMARY KEY,
                timestamp BIGINT NOT NULL,
                title TEXT,
                content TEXT,
                subplebbit_address TEXT NOT NULL,
                author_address TEXT NOT NULL,
                author_display_name TEXT,
                upvote_count BIGINT NOT NULL DEFAULT 0,
                downvote_count BIGINT NOT NULL DEFAULT 0,
                reply_count BIGINT NOT NULL DEFAULT 0,
                parent_cid TEXT,
                post_cid TEXT,
                depth INTEGER NOT NULL DEFAULT 0,
                raw JSONB NOT NULL,
                indexed_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                moderated_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_posts_subplebbit ON posts(subplebbit_address)",
        )
        .execute(&self.pool)
        .await
        .ok();

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_posts_timestamp ON posts(timestamp)")
            .execute(&self.pool)
            .await
            .ok();

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_posts_unmoderated ON posts(indexed_at) WHERE moderated_at IS NULL",
        )
        .execute(&self.pool)
        .await
        .ok();

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS known_subplebbits (
                address TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                discovered_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                last_seen_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                title TEXT,
                tags JSONB NOT NULL DEFAULT '[]'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subplebbit_queue (
                address TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'queued',
                last_success_at TIMESTAMPTZ,
                last_failure_at TIMESTAMPTZ,
                success_count BIGINT NOT NULL DEFAULT 0,
                failure_count BIGINT NOT NULL DEFAULT 0,
                run_count BIGINT NOT NULL DEFAULT 0,
                last_error TEXT,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS flagged_posts (
                cid TEXT PRIMARY KEY,
                timestamp BIGINT NOT NULL,
                title TEXT,
                content TEXT,
                subplebbit_address TEXT NOT NULL,
                author_address TEXT NOT NULL,
                author_display_name TEXT,
                upvote_count BIGINT NOT NULL DEFAULT 0,
                downvote_count BIGINT NOT NULL DEFAULT 0,
                reply_count BIGINT NOT NULL DEFAULT 0,
                parent_cid TEXT,
                post_cid TEXT,
                depth INTEGER NOT NULL DEFAULT 0,
                raw JSONB NOT NULL,
                reason TEXT NOT NULL,
                harm_score INTEGER NOT NULL,
                category TEXT NOT NULL,
                flag_source TEXT NOT NULL,
                flagged_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                status TEXT NOT NULL DEFAULT 'pending'
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_flagged_posts_status ON flagged_posts(status)",
        )
        .execute(&self.pool)
        .await
        .ok();

        Ok(())
    }
}

fn post_from_row(row: &PgRow) -> Post {
    Post {
        cid: row.get("cid"),
        timestamp: row.get("timestamp"),
        title: row.get("title"),
        content: row.get("content"),
        subplebbit_address: row.get("subplebbit_address"),
        author_address: row.get("author_address"),
        author_display_name: row.get("author_display_name"),
        upvote_count: row.get("upvote_count"),
        downvote_count: row.get("downvote_count"),
        reply_count: row.get("reply_count"),
        parent_cid: row.get("parent_cid"),
        post_cid: row.get("post_cid"),
        depth: row.get("depth"),
        raw: row.get("raw"),
        moderated_at: row.get("moderated_at"),
    }
}

fn flagged_from_row(row: &PgRow) -> FlaggedPost {
    let category_str: String = row.get("category");
    let source_str: String = row.get("flag_source");
    let status_str: String = row.get("status");

    FlaggedPost {
        post: Post {
            cid: row.get("cid"),
            timestamp: row.get("timestamp"),
            title: row.get("title"),
            content: row.get("content"),
            subplebbit_address: row.get("subplebbit_address"),
            author_address: row.get("author_address"),
            author_display_name: row.get("author_display_name"),
            upvote_count: row.get("upvote_count"),
            downvote_count: row.get("downvote_count"),
            reply_count: row.get("reply_count"),
            parent_cid: row.get("parent_cid"),
            post_cid: row.get("post_cid"),
            depth: row.get("depth"),
            raw: row.get("raw"),
            moderated_at: None,
        },
        reason: row.get("reason"),
        harm_score: row.get("harm_score"),
        category: ModerationCategory::parse(&category_str).unwrap_or(ModerationCategory::Multiple),
        flag_source: FlagSource::parse(&source_str).unwrap_or(FlagSource::Report),
        flagged_at: row.get("flagged_at"),
        status: FlagAction::parse(&status_str).unwrap_or(FlagAction::Pending),
    }
}

fn queue_item_from_row(row: &PgRow) -> QueueItem {
    let status_str: String = row.get("status");
    QueueItem {
        address: row.get("address"),
        status: QueueStatus::parse(&status_str).unwrap_or(QueueStatus::Queued),
        last_success_at: row.get("last_success_at"),
        last_failure_at: row.get("last_failure_at"),
        success_count: row.get("success_count"),
        failure_count: row.get("failure_count"),
        run_count: row.get("run_count"),
        last_error: row.get("last_error"),
        updated_at: row.get("updated_at"),
    }
}

#[async_trait]
impl IndexStore for PostgresIndexStore {
    // ========================================================================
    // KNOWN SUBPLEBBITS
    // ========================================================================

    async fn upsert_known_subplebbit(
        &self,
        address: &str,
        source: DiscoverySource,
        tags: &[String],
    ) -> Result<UpsertOutcome> {
        // xmax = 0 means INSERT, xmax > 0 means UPDATE
        let row = sqlx::query(
            r#"
            INSERT INTO known_subplebbits (address, source, tags)
            VALUES ($1, $2, $3)
            ON CONFLICT (address) DO UPDATE SET
                last_seen_at = NOW(),
                tags = EXCLUDED.tags
            RETURNING (xmax = 0) as was_inserted
            "#,
        )
        .bind(address)
        .bind(source.as_str())
        .bind(serde_json::to_value(tags).unwrap_or_else(|_| serde_json::Value::Array(Vec::new())))
        .fetch_one(&self.pool)
        .await?;

        Ok(UpsertOutcome {
            was_inserted: row.get("was_inserted"),
        })
    }

    async fn update_known_title(&self, address: &str, title: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE known_subplebbits
            SET title = COALESCE($2, title),
                last_seen_at = NOW()
            WHERE address = $1
            "#,
        )
        .bind(address)
        .bind(title)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_known_addresses(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT address FROM known_subplebbits ORDER BY discovered_at")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(|r| r.get("address")).collect())
    }

    async fn purge_invalid_known(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM known_subplebbits WHERE address IS NULL OR address = '' OR source IS NULL OR source = ''",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge_known_not_seen_since(
        &self,
        source: DiscoverySource,
        cutoff: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM known_subplebbits WHERE source = $1 AND last_seen_at < $2",
        )
        .bind(source.as_str())
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    // ========================================================================
    // CRAWL QUEUE
    // ========================================================================

    async fn enqueue(&self, address: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO subplebbit_queue (address, status)
            VALUES ($1, 'queued')
            ON CONFLICT (address) DO NOTHING
            "#,
        )
        .bind(address)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn queued_batch(&self, limit: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT address FROM subplebbit_queue
            WHERE status = 'queued'
            ORDER BY updated_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.get("address")).collect())
    }

    async fn claim(&self, address: &str) -> Result<bool> {
        // Conditional transition: the affected-row count tells us whether we
        // actually won the claim.
        let result = sqlx::query(
            r#"
            UPDATE subplebbit_queue
            SET status = 'processing',
                run_count = run_count + 1,
                updated_at = NOW()
            WHERE address = $1 AND status = 'queued'
            "#,
        )
        .bind(address)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_stuck(&self) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE subplebbit_queue
            SET status = 'queued', updated_at = NOW()
            WHERE status = 'processing'
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn processing_count(&self) -> Result<i64> {
        let row =
            sqlx::query("SELECT COUNT(*) as count FROM subplebbit_queue WHERE status = 'processing'")
                .fetch_one(&self.pool)
                .await?;
        Ok(row.get("count"))
    }

    async fn addresses_missing_from_queue(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT k.address
            FROM known_subplebbits k
            LEFT JOIN subplebbit_queue q ON q.address = k.address
            WHERE q.address IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.get("address")).collect())
    }

    async fn record_success(&self, address: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE subplebbit_queue
            SET status = 'success',
                success_count = success_count + 1,
                last_success_at = NOW(),
                last_error = NULL,
                updated_at = NOW()
            WHERE address = $1
            "#,
        )
        .bind(address)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_failure(&self, address: &str, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE subplebbit_queue
            SET status = 'failed',
                failure_count = failure_count + 1,
                last_failure_at = NOW(),
                last_error = $2,
                updated_at = NOW()
            WHERE address = $1
            "#,
        )
        .bind(address)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn retry_failed(&self, address: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subplebbit_queue
            SET status = 'queued', updated_at = NOW()
            WHERE address = $1 AND status = 'failed'
            "#,
        )
        .bind(address)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_queue_item(&self, address: &str) -> Result<Option<QueueItem>> {
        let row = sqlx::query("SELECT * FROM subplebbit_queue WHERE address = $1")
            .bind(address)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| queue_item_from_row(&r)))
    }

    async fn list_queue(&self) -> Result<Vec<QueueItem>> {
        let rows = sqlx::query("SELECT * FROM subplebbit_queue ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(queue_item_from_row).collect())
    }

    // ========================================================================
    // POSTS
    // ========================================================================

    async fn index_posts(&self, posts: &[Post]) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        for post in posts {
            // Authoritative snapshot: replace the previous row for this cid.
            // The moderation stamp survives the replacement so a re-crawl
            // does not push already-classified content back into the backlog.
            let deleted = sqlx::query("DELETE FROM posts WHERE cid = $1 RETURNING moderated_at")
                .bind(&post.cid)
                .fetch_optional(&mut *tx)
                .await?;
            let prior_moderated_at: Option<DateTime<Utc>> =
                deleted.and_then(|r| r.get("moderated_at"));

            sqlx::query(
                r#"
                INSERT INTO posts (
                    cid, timestamp, title, content, subplebbit_address,
                    author_address, author_display_name,
                    upvote_count, downvote_count, reply_count,
                    parent_cid, post_cid, depth, raw, moderated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
                "#,
            )
            .bind(&post.cid)
            .bind(post.timestamp)
            .bind(&post.title)
            .bind(&post.content)
            .bind(&post.subplebbit_address)
            .bind(&post.author_address)
            .bind(&post.author_display_name)
            .bind(post.upvote_count)
            .bind(post.downvote_count)
            .bind(post.reply_count)
            .bind(&post.parent_cid)
            .bind(&post.post_cid)
            .bind(post.depth)
            .bind(&post.raw)
            .bind(prior_moderated_at.or(post.moderated_at))
            .execute(&mut *tx)
            .await?;

            written += 1;
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn get_post(&self, cid: &str) -> Result<Option<Post>> {
        let row = sqlx::query("SELECT * FROM posts WHERE cid = $1")
            .bind(cid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| post_from_row(&r)))
    }

    async fn query_posts(&self, query: &PostQuery) -> Result<Vec<Post>> {
        let order = match query.sort {
            PostSort::NewestFirst => "timestamp DESC",
            PostSort::OldestFirst => "timestamp ASC",
            PostSort::MostUpvoted => "upvote_count DESC",
        };

        let sql = format!(
            r#"
            SELECT * FROM posts
            WHERE ($1::text IS NULL OR subplebbit_address = $1)
              AND ($2::bigint IS NULL OR timestamp >= $2)
              AND ($3::bigint IS NULL OR timestamp <= $3)
              AND ($4::text IS NULL
                   OR content ILIKE '%' || $4 || '%'
                   OR title ILIKE '%' || $4 || '%')
            ORDER BY {order}
            LIMIT $5 OFFSET $6
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(&query.subplebbit)
            .bind(query.since)
            .bind(query.until)
            .bind(&query.search)
            .bind(query.limit)
            .bind(query.offset)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(post_from_row).collect())
    }

    async fn delete_post(&self, cid: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM posts WHERE cid = $1")
            .bind(cid)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn unmoderated_posts(&self, limit: i64) -> Result<Vec<Post>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM posts
            WHERE moderated_at IS NULL
            ORDER BY indexed_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(post_from_row).collect())
    }

    async fn mark_moderated(&self, cid: &str) -> Result<()> {
        sqlx::query(
            "UPDATE posts SET moderated_at = NOW() WHERE cid = $1 AND moderated_at IS NULL",
        )
        .bind(cid)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // ========================================================================
    // FLAGGED POSTS
    // ========================================================================

    async fn deindex_exclusions(&self) -> Result<Exclusions> {
        let mut exclusions = Exclusions::default();

        let rows = sqlx::query(
            r#"
            SELECT cid, author_address, subplebbit_address, status
            FROM flagged_posts
            WHERE status IN ('deindexed_comment', 'deindexed_author', 'deindexed_subplebbit')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        for row in rows {
            let status: String = row.get("status");
            match status.as_str() {
                "deindexed_comment" => {
                    exclusions.cids.insert(row.get("cid"));
                }
                "deindexed_author" => {
                    exclusions.authors.insert(row.get("author_address"));
                }
                "deindexed_subplebbit" => {
                    exclusions.subplebbits.insert(row.get("subplebbit_address"));
                }
                _ => {}
            }
        }

        Ok(exclusions)
    }

    async fn insert_flagged(&self, flagged: &FlaggedPost) -> Result<()> {
        // First flag for a cid wins; a later cascade pass or duplicate report
        // must not clobber a reviewed flag.
        sqlx::query(
            r#"
            INSERT INTO flagged_posts (
                cid, timestamp, title, content, subplebbit_address,
                author_address, author_display_name,
                upvote_count, downvote_count, reply_count,
                parent_cid, post_cid, depth, raw,
                reason, harm_score, category, flag_source, flagged_at, status
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10,
                    $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            ON CONFLICT (cid) DO NOTHING
            "#,
        )
        .bind(&flagged.post.cid)
        .bind(flagged.post.timestamp)
        .bind(&flagged.post.title)
        .bind(&flagged.post.content)
        .bind(&flagged.post.subplebbit_address)
        .bind(&flagged.post.author_address)
        .bind(&flagged.post.author_display_name)
        .bind(flagged.post.upvote_count)
        .bind(flagged.post.downvote_count)
        .bind(flagged.post.reply_count)
        .bind(&flagged.post.parent_cid)
        .bind(&flagged.post.post_cid)
        .bind(flagged.post.depth)
        .bind(&flagged.post.raw)
        .bind(&flagged.reason)
        .bind(flagged.harm_score)
        .bind(flagged.category.as_str())
        .bind(flagged.flag_source.as_str())
        .bind(flagged.flagged_at)
        .bind(flagged.status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_flagged(&self, cid: &str) -> Result<Option<FlaggedPost>> {
        let row = sqlx::query("SELECT * FROM flagged_posts WHERE cid = $1")
            .bind(cid)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| flagged_from_row(&r)))
    }

    async fn list_flagged(&self, status: Option<FlagAction>) -> Result<Vec<FlaggedPost>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM flagged_posts
            WHERE ($1::text IS NULL OR status = $1)
            ORDER BY flagged_at DESC
            "#,
        )
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(flagged_from_row).collect())
    }

    async fn set_flag_status(&self, cid: &str, status: FlagAction) -> Result<bool> {
        let result = sqlx::query("UPDATE flagged_posts SET status = $2 WHERE cid = $1")
            .bind(cid)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
