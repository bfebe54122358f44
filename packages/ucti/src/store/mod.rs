//! SQLite storage.
//!
//! A single file-backed database shared by every component in the process.
//! The pool is the reference-counted connection handle: it is opened once at
//! startup and cloned into each task. Schema setup is idempotent and runs at
//! connect time.
//!
//! The full-text predicate used by search stage 1 is an FTS5 virtual table
//! over `content_search`, kept in sync with `posts` by triggers so the index
//! follows enricher rewrites of the search document.

mod cache;
mod iocs;
mod posts;
mod tags;

pub use posts::PostFilter;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use crate::error::{Result, UctiError};

/// Shared storage handle. Cheap to clone.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
    fts_queries: Arc<AtomicU64>,
}

impl Store {
    /// Open (or create) the database at the given URL and run migrations.
    ///
    /// URL examples: `sqlite://data/ucti.sqlite?mode=rwc`, `sqlite::memory:`.
    pub async fn connect(database_url: &str) -> Result<Self> {
        Self::connect_with(database_url, 5).await
    }

    /// Open a database file on disk.
    pub async fn open(path: &std::path::Path) -> Result<Self> {
        Self::connect(&format!("sqlite://{}?mode=rwc", path.display())).await
    }

    /// In-memory database (for tests). A single connection: every pooled
    /// connection to `:memory:` would otherwise see its own empty database.
    pub async fn in_memory() -> Result<Self> {
        Self::connect_with("sqlite::memory:", 1).await
    }

    async fn connect_with(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        let store = Self {
            pool,
            fts_queries: Arc::new(AtomicU64::new(0)),
        };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Number of full-text queries executed so far by this handle.
    pub fn fts_query_count(&self) -> u64 {
        self.fts_queries.load(Ordering::Relaxed)
    }

    pub(crate) fn count_fts_query(&self) {
        self.fts_queries.fetch_add(1, Ordering::Relaxed);
    }

    /// The underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS posts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                source TEXT NOT NULL,
                source_id TEXT NOT NULL,
                user TEXT NOT NULL,
                url TEXT NOT NULL,
                created_at TEXT NOT NULL,
                fetched_at TEXT NOT NULL,
                content_html TEXT NOT NULL,
                content_txt TEXT NOT NULL,
                content_search TEXT,
                raw TEXT NOT NULL,
                is_hidden INTEGER NOT NULL DEFAULT 0,
                is_ingested INTEGER NOT NULL DEFAULT 0,
                tags_assigned INTEGER NOT NULL DEFAULT 0,
                iocs_assigned INTEGER NOT NULL DEFAULT 0,
                UNIQUE(source, source_id)
            );

            CREATE INDEX IF NOT EXISTS idx_posts_source_created ON posts(source, created_at);
            CREATE INDEX IF NOT EXISTS idx_posts_flags ON posts(is_ingested, tags_assigned, iocs_assigned);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                color TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS post_tags (
                post_id INTEGER NOT NULL REFERENCES posts(id),
                tag_id INTEGER NOT NULL REFERENCES tags(id),
                PRIMARY KEY (post_id, tag_id)
            );

            CREATE INDEX IF NOT EXISTS idx_post_tags_tag ON post_tags(tag_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS iocs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                value TEXT NOT NULL,
                type TEXT NOT NULL,
                subtype TEXT,
                comment TEXT,
                UNIQUE(type, subtype, value)
            );

            CREATE TABLE IF NOT EXISTS post_iocs (
                post_id INTEGER NOT NULL REFERENCES posts(id),
                ioc_id INTEGER NOT NULL REFERENCES iocs(id),
                PRIMARY KEY (post_id, ioc_id)
            );

            CREATE INDEX IF NOT EXISTS idx_post_iocs_ioc ON post_iocs(ioc_id);
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS search_cache (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                query_hash TEXT NOT NULL UNIQUE,
                query TEXT NOT NULL,
                expires_at TEXT NOT NULL,
                filepath TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        // FTS5 index over the materialized search document. External-content
        // tables do not track updates on their own; the triggers mirror every
        // change of `content_search` into the index.
        sqlx::query(
            r#"
            CREATE VIRTUAL TABLE IF NOT EXISTS posts_fts USING fts5(
                content_search,
                content='posts',
                content_rowid='id'
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TRIGGER IF NOT EXISTS posts_fts_insert AFTER INSERT ON posts BEGIN
                INSERT INTO posts_fts(rowid, content_search)
                VALUES (new.id, coalesce(new.content_search, ''));
            END;

            CREATE TRIGGER IF NOT EXISTS posts_fts_delete AFTER DELETE ON posts BEGIN
                INSERT INTO posts_fts(posts_fts, rowid, content_search)
                VALUES ('delete', old.id, coalesce(old.content_search, ''));
            END;

            CREATE TRIGGER IF NOT EXISTS posts_fts_update AFTER UPDATE ON posts BEGIN
                INSERT INTO posts_fts(posts_fts, rowid, content_search)
                VALUES ('delete', old.id, coalesce(old.content_search, ''));
                INSERT INTO posts_fts(rowid, content_search)
                VALUES (new.id, coalesce(new.content_search, ''));
            END;
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Canonical timestamp encoding: RFC 3339, fixed nanosecond width, `Z`
/// suffix. Fixed width keeps lexicographic ordering equal to time ordering,
/// which the date-window predicates rely on; full precision keeps stored
/// timestamps identical to the in-memory values they came from.
pub(crate) fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

pub(crate) fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| UctiError::Config(format!("invalid timestamp {raw:?}: {e}")))
}
