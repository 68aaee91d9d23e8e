//! Dedup store backed by a local SQLite database
//!
//! One `items` table keyed by the globally unique storage ID. Insertion
//! is idempotent: first write wins, later writes with the same ID are
//! silently dropped, never merged. Timestamps are stored as Unix
//! milliseconds so the newest-first ordering is total; the `metrics`
//! payload is an opaque serialized blob deserialized only at the read
//! boundary.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{PollError, Result};
use crate::schemas::{Item, RawItem, Source};

/// Row caps bound response size for the query layer; they are not a
/// pagination mechanism.
const SINGLE_SOURCE_CAP: i64 = 100;
const ALL_SOURCES_CAP: i64 = 300;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS items (
    id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    title TEXT,
    body TEXT,
    url TEXT,
    author TEXT,
    score INTEGER NOT NULL DEFAULT 0,
    origin_channel TEXT,
    permalink TEXT,
    metrics TEXT,
    created_at INTEGER NOT NULL,
    fetched_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_items_source ON items(source);
CREATE INDEX IF NOT EXISTS idx_items_created_at ON items(created_at DESC);
"#;

/// Per-source row count, for status and refresh telemetry
#[derive(Debug, Clone, Serialize)]
pub struct SourceCount {
    pub source: Source,
    pub count: i64,
}

/// Storage manager for persisted items
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Opens (or creates) the database file at the configured location
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!(path = %path.display(), "Opening item store");

        // WAL keeps readers unblocked while a cycle is inserting; the
        // busy timeout absorbs writer contention between cycles and
        // refresh triggers.
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::bootstrap(pool).await
    }

    /// Opens an in-memory store, for tests
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new().in_memory(true);

        // A single connection: every :memory: connection is its own
        // database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Self::bootstrap(pool).await
    }

    async fn bootstrap(pool: SqlitePool) -> Result<Self> {
        sqlx::raw_sql(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Inserts an item unless its ID is already present. Returns whether
    /// a new row was actually written; duplicates are a no-op, not an
    /// error. Atomic per row regardless of concurrent callers.
    pub async fn insert_if_absent(&self, item: &RawItem) -> Result<bool> {
        let id = item.storage_id();
        let metrics_blob = item
            .metrics
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let fetched_at = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO items (
                id, source, title, body, url, author, score,
                origin_channel, permalink, metrics, created_at, fetched_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(&id)
        .bind(item.source.as_str())
        .bind(&item.title)
        .bind(&item.body)
        .bind(&item.url)
        .bind(&item.author)
        .bind(item.score)
        .bind(&item.origin_channel)
        .bind(&item.permalink)
        .bind(metrics_blob)
        .bind(item.created_at.timestamp_millis())
        .bind(fetched_at.timestamp_millis())
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() == 1;
        if !inserted {
            debug!(id = %id, "Duplicate item, keeping first write");
        }
        Ok(inserted)
    }

    /// Newest-first items for one source, capped
    pub async fn list_by_source(&self, source: Source) -> Result<Vec<Item>> {
        let rows = sqlx::query(
            r#"
            SELECT id, source, title, body, url, author, score,
                   origin_channel, permalink, metrics, created_at, fetched_at
            FROM items
            WHERE source = ?1
            ORDER BY created_at DESC
            LIMIT ?2
            "#,
        )
        .bind(source.as_str())
        .bind(SINGLE_SOURCE_CAP)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_item).collect()
    }

    /// Newest-first items across all sources, capped
    pub async fn list_all(&self) -> Result<Vec<Item>> {
        let rows = sqlx::query(
            r#"
            SELECT id, source, title, body, url, author, score,
                   origin_channel, permalink, metrics, created_at, fetched_at
            FROM items
            ORDER BY created_at DESC
            LIMIT ?1
            "#,
        )
        .bind(ALL_SOURCES_CAP)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_item).collect()
    }

    /// Closes the underlying pool, flushing outstanding writes
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Row counts per source
    pub async fn count_by_source(&self) -> Result<Vec<SourceCount>> {
        let rows = sqlx::query(
            "SELECT source, COUNT(*) AS n FROM items GROUP BY source ORDER BY source",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                let source: Source = row.try_get::<String, _>("source")?.parse()?;
                let count: i64 = row.try_get("n")?;
                Ok(SourceCount { source, count })
            })
            .collect()
    }
}

fn row_to_item(row: SqliteRow) -> Result<Item> {
    let source: Source = row.try_get::<String, _>("source")?.parse()?;
    let metrics = row
        .try_get::<Option<String>, _>("metrics")?
        .map(|blob| serde_json::from_str(&blob))
        .transpose()?;

    Ok(Item {
        id: row.try_get("id")?,
        source,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        url: row.try_get("url")?,
        author: row.try_get("author")?,
        score: row.try_get("score")?,
        origin_channel: row.try_get("origin_channel")?,
        permalink: row.try_get("permalink")?,
        metrics,
        created_at: millis_to_datetime(row.try_get("created_at")?)?,
        fetched_at: millis_to_datetime(row.try_get("fetched_at")?)?,
    })
}

fn millis_to_datetime(millis: i64) -> Result<DateTime<Utc>> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| PollError::ParseError(format!("timestamp out of range: {millis}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_item(source: Source, native_id: &str, created_secs: i64) -> RawItem {
        RawItem {
            source,
            native_id: native_id.to_string(),
            title: Some(format!("title {native_id}")),
            body: None,
            url: None,
            author: Some("author".to_string()),
            score: 1,
            origin_channel: Some("rust".to_string()),
            permalink: None,
            metrics: None,
            created_at: Utc.timestamp_opt(created_secs, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_insert_is_idempotent() {
        let store = Store::in_memory().await.unwrap();
        let item = raw_item(Source::ForumPost, "abc", 1_700_000_000);

        assert!(store.insert_if_absent(&item).await.unwrap());
        assert!(!store.insert_if_absent(&item).await.unwrap());

        let stored = store.list_by_source(Source::ForumPost).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, "forum_post_abc");
    }

    #[tokio::test]
    async fn test_first_write_wins() {
        let store = Store::in_memory().await.unwrap();

        let first = raw_item(Source::ForumPost, "abc", 1_700_000_000);
        let mut second = raw_item(Source::ForumPost, "abc", 1_700_000_000);
        second.title = Some("revised title".to_string());
        second.score = 99;

        store.insert_if_absent(&first).await.unwrap();
        store.insert_if_absent(&second).await.unwrap();

        let stored = store.list_by_source(Source::ForumPost).await.unwrap();
        assert_eq!(stored[0].title.as_deref(), Some("title abc"));
        assert_eq!(stored[0].score, 1);
    }

    #[tokio::test]
    async fn test_shared_native_id_across_sources() {
        let store = Store::in_memory().await.unwrap();

        let post = raw_item(Source::ForumPost, "18abc", 1_700_000_000);
        let comment = raw_item(Source::ForumComment, "18abc", 1_700_000_001);

        assert!(store.insert_if_absent(&post).await.unwrap());
        assert!(store.insert_if_absent(&comment).await.unwrap());

        let all = store.list_all().await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_list_all_orders_by_created_at_desc() {
        let store = Store::in_memory().await.unwrap();

        for (native_id, secs) in [("a", 1_700_000_100), ("b", 1_700_000_300), ("c", 1_700_000_200)] {
            store
                .insert_if_absent(&raw_item(Source::ForumPost, native_id, secs))
                .await
                .unwrap();
        }
        store
            .insert_if_absent(&raw_item(Source::MicroblogPost, "m", 1_700_000_250))
            .await
            .unwrap();

        let all = store.list_all().await.unwrap();
        let timestamps: Vec<i64> = all.iter().map(|i| i.created_at.timestamp()).collect();
        assert_eq!(
            timestamps,
            vec![1_700_000_300, 1_700_000_250, 1_700_000_200, 1_700_000_100]
        );
    }

    #[tokio::test]
    async fn test_single_source_cap() {
        let store = Store::in_memory().await.unwrap();

        for i in 0..(SINGLE_SOURCE_CAP + 5) {
            let item = raw_item(Source::ForumComment, &format!("c{i}"), 1_700_000_000 + i);
            store.insert_if_absent(&item).await.unwrap();
        }

        let stored = store.list_by_source(Source::ForumComment).await.unwrap();
        assert_eq!(stored.len(), SINGLE_SOURCE_CAP as usize);
        // Capped to the most recent rows
        assert_eq!(
            stored[0].created_at.timestamp(),
            1_700_000_000 + SINGLE_SOURCE_CAP + 4
        );
    }

    #[tokio::test]
    async fn test_metrics_round_trip_at_read_boundary() {
        let store = Store::in_memory().await.unwrap();

        let mut item = raw_item(Source::MicroblogPost, "42", 1_700_000_000);
        item.metrics = Some(serde_json::json!({ "like_count": 7, "retweet_count": 2 }));

        store.insert_if_absent(&item).await.unwrap();

        let stored = store.list_by_source(Source::MicroblogPost).await.unwrap();
        assert_eq!(
            stored[0].metrics,
            Some(serde_json::json!({ "like_count": 7, "retweet_count": 2 }))
        );
    }

    #[tokio::test]
    async fn test_count_by_source() {
        let store = Store::in_memory().await.unwrap();

        for i in 0..3 {
            store
                .insert_if_absent(&raw_item(Source::ForumPost, &format!("p{i}"), 1_700_000_000))
                .await
                .unwrap();
        }
        store
            .insert_if_absent(&raw_item(Source::MicroblogPost, "m0", 1_700_000_000))
            .await
            .unwrap();

        let counts = store.count_by_source().await.unwrap();
        let forum = counts.iter().find(|c| c.source == Source::ForumPost).unwrap();
        let micro = counts
            .iter()
            .find(|c| c.source == Source::MicroblogPost)
            .unwrap();
        assert_eq!(forum.count, 3);
        assert_eq!(micro.count, 1);
    }

    #[tokio::test]
    async fn test_file_backed_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.db");

        {
            let store = Store::open(&path).await.unwrap();
            store
                .insert_if_absent(&raw_item(Source::ForumPost, "keep", 1_700_000_000))
                .await
                .unwrap();
            store.close().await;
        }

        let reopened = Store::open(&path).await.unwrap();
        let stored = reopened.list_by_source(Source::ForumPost).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, "forum_post_keep");
    }
}
