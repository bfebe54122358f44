//! Post persistence and the full-text retrieval primitive.

use chrono::{DateTime, Utc};
use sqlx::{FromRow, QueryBuilder, Row, Sqlite};

use super::{fmt_ts, parse_ts, Store};
use crate::error::Result;
use crate::types::{NewPost, Post};

#[derive(Debug, FromRow)]
struct PostRow {
    id: i64,
    source: String,
    source_id: String,
    user: String,
    url: String,
    created_at: String,
    fetched_at: String,
    content_html: String,
    content_txt: String,
    content_search: Option<String>,
    raw: String,
    is_hidden: bool,
    is_ingested: bool,
    tags_assigned: bool,
    iocs_assigned: bool,
}

impl PostRow {
    fn into_post(self) -> Result<Post> {
        Ok(Post {
            id: self.id,
            source: self.source,
            source_id: self.source_id,
            user: self.user,
            url: self.url,
            created_at: parse_ts(&self.created_at)?,
            fetched_at: parse_ts(&self.fetched_at)?,
            content_html: self.content_html,
            content_txt: self.content_txt,
            content_search: self.content_search,
            raw: self.raw,
            is_hidden: self.is_hidden,
            is_ingested: self.is_ingested,
            tags_assigned: self.tags_assigned,
            iocs_assigned: self.iocs_assigned,
        })
    }
}

const POST_COLUMNS: &str = "id, source, source_id, user, url, created_at, fetched_at, \
     content_html, content_txt, content_search, raw, is_hidden, is_ingested, \
     tags_assigned, iocs_assigned";

/// Selection predicate for [`Store::find_posts`].
#[derive(Debug, Clone, Default)]
pub struct PostFilter {
    pub is_ingested: Option<bool>,
    pub tags_assigned: Option<bool>,
    pub iocs_assigned: Option<bool>,
    pub is_hidden: Option<bool>,
    /// Restrict to these ids (used by per-source enrichment runs)
    pub ids: Option<Vec<i64>>,
    /// Cursor for batched jobs: only ids strictly greater than this
    pub id_gt: Option<i64>,
    /// Only posts with no linked IoCs
    pub without_iocs: bool,
    /// Newest-id first instead of oldest-id first
    pub order_desc: bool,
    pub limit: Option<i64>,
}

impl PostFilter {
    /// Posts waiting for the cybersecurity filter stage.
    pub fn uningested() -> Self {
        Self {
            is_ingested: Some(false),
            ..Self::default()
        }
    }

    /// Posts waiting for tag assignment.
    pub fn untagged() -> Self {
        Self {
            tags_assigned: Some(false),
            is_hidden: Some(false),
            order_desc: true,
            ..Self::default()
        }
    }

    /// Posts waiting for IoC extraction.
    pub fn without_assigned_iocs() -> Self {
        Self {
            iocs_assigned: Some(false),
            is_hidden: Some(false),
            ..Self::default()
        }
    }

    pub fn with_ids(mut self, ids: Vec<i64>) -> Self {
        self.ids = Some(ids);
        self
    }
}

impl Store {
    /// Insert a new post. The caller has already checked
    /// `(source, source_id)` does not exist; `early_ingested` marks
    /// trivially short posts that skip enrichment.
    pub async fn create_post(&self, new: &NewPost, early_ingested: bool) -> Result<Post> {
        let fetched_at = Utc::now();
        let row: PostRow = sqlx::query_as(&format!(
            "INSERT INTO posts (source, source_id, user, url, created_at, fetched_at, \
             content_html, content_txt, raw, is_ingested) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
             RETURNING {POST_COLUMNS}"
        ))
        .bind(&new.source)
        .bind(&new.source_id)
        .bind(&new.user)
        .bind(&new.url)
        .bind(fmt_ts(&new.created_at))
        .bind(fmt_ts(&fetched_at))
        .bind(&new.content_html)
        .bind(&new.content_txt)
        .bind(&new.raw)
        .bind(early_ingested)
        .fetch_one(self.pool())
        .await?;
        row.into_post()
    }

    pub async fn find_post(&self, id: i64) -> Result<Option<Post>> {
        let row: Option<PostRow> =
            sqlx::query_as(&format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?1"))
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        row.map(PostRow::into_post).transpose()
    }

    /// Duplicate check used by every adapter before insertion.
    pub async fn find_by_source_id(&self, source: &str, source_id: &str) -> Result<Option<Post>> {
        let row: Option<PostRow> = sqlx::query_as(&format!(
            "SELECT {POST_COLUMNS} FROM posts WHERE source = ?1 AND source_id = ?2"
        ))
        .bind(source)
        .bind(source_id)
        .fetch_optional(self.pool())
        .await?;
        row.map(PostRow::into_post).transpose()
    }

    pub async fn find_posts(&self, filter: &PostFilter) -> Result<Vec<Post>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {POST_COLUMNS} FROM posts WHERE 1=1"));

        if let Some(flag) = filter.is_ingested {
            builder.push(" AND is_ingested = ").push_bind(flag);
        }
        if let Some(flag) = filter.tags_assigned {
            builder.push(" AND tags_assigned = ").push_bind(flag);
        }
        if let Some(flag) = filter.iocs_assigned {
            builder.push(" AND iocs_assigned = ").push_bind(flag);
        }
        if let Some(flag) = filter.is_hidden {
            builder.push(" AND is_hidden = ").push_bind(flag);
        }
        if let Some(ids) = &filter.ids {
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            builder.push(" AND id IN (");
            let mut separated = builder.separated(", ");
            for id in ids {
                separated.push_bind(*id);
            }
            builder.push(")");
        }
        if let Some(cursor) = filter.id_gt {
            builder.push(" AND id > ").push_bind(cursor);
        }
        if filter.without_iocs {
            builder.push(" AND NOT EXISTS (SELECT 1 FROM post_iocs WHERE post_id = posts.id)");
        }
        builder.push(if filter.order_desc {
            " ORDER BY id DESC"
        } else {
            " ORDER BY id ASC"
        });
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ").push_bind(limit);
        }

        let rows: Vec<PostRow> = builder.build_query_as().fetch_all(self.pool()).await?;
        rows.into_iter().map(PostRow::into_post).collect()
    }

    pub async fn set_hidden(&self, id: i64, hidden: bool) -> Result<()> {
        sqlx::query("UPDATE posts SET is_hidden = ?1 WHERE id = ?2")
            .bind(hidden)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn set_ingested(&self, id: i64, ingested: bool) -> Result<()> {
        sqlx::query("UPDATE posts SET is_ingested = ?1 WHERE id = ?2")
            .bind(ingested)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn set_tags_assigned(&self, id: i64, assigned: bool) -> Result<()> {
        sqlx::query("UPDATE posts SET tags_assigned = ?1 WHERE id = ?2")
            .bind(assigned)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn set_iocs_assigned(&self, id: i64, assigned: bool) -> Result<()> {
        sqlx::query("UPDATE posts SET iocs_assigned = ?1 WHERE id = ?2")
            .bind(assigned)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    pub async fn set_content_search(&self, id: i64, content_search: &str) -> Result<()> {
        sqlx::query("UPDATE posts SET content_search = ?1 WHERE id = ?2")
            .bind(content_search)
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }

    /// Boolean-mode full-text match over `content_search`, restricted to
    /// visible posts inside the hard date window. Returns candidate post ids.
    pub async fn full_text_match(
        &self,
        match_query: &str,
        earliest: &DateTime<Utc>,
        latest: &DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<i64>> {
        self.count_fts_query();
        let rows = sqlx::query(
            "SELECT p.id FROM posts_fts f \
             JOIN posts p ON p.id = f.rowid \
             WHERE posts_fts MATCH ?1 \
               AND p.is_hidden = 0 \
               AND p.created_at >= ?2 AND p.created_at <= ?3 \
             LIMIT ?4",
        )
        .bind(match_query)
        .bind(fmt_ts(earliest))
        .bind(fmt_ts(latest))
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.iter().map(|row| row.get::<i64, _>(0)).collect())
    }

    /// Most recent origin timestamp stored for a source (the ingestion
    /// watermark).
    pub async fn latest_created_at(&self, source: &str) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> =
            sqlx::query_scalar("SELECT MAX(created_at) FROM posts WHERE source = ?1")
                .bind(source)
                .fetch_one(self.pool())
                .await?;
        raw.as_deref().map(parse_ts).transpose()
    }

    /// `source_id` of the most recently created post for a source. Used by
    /// adapters whose pagination cursor is the source-native id.
    pub async fn latest_source_id(&self, source: &str) -> Result<Option<String>> {
        let raw: Option<String> = sqlx::query_scalar(
            "SELECT source_id FROM posts WHERE source = ?1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(source)
        .fetch_optional(self.pool())
        .await?;
        Ok(raw)
    }

    /// Most recent local fetch time across visible posts, optionally for a
    /// single source. Drives the healthcheck.
    pub async fn latest_fetched(&self, source: Option<&str>) -> Result<Option<DateTime<Utc>>> {
        let raw: Option<String> = match source {
            Some(source) => {
                sqlx::query_scalar(
                    "SELECT MAX(fetched_at) FROM posts WHERE is_hidden = 0 AND source = ?1",
                )
                .bind(source)
                .fetch_one(self.pool())
                .await?
            }
            None => {
                sqlx::query_scalar("SELECT MAX(fetched_at) FROM posts WHERE is_hidden = 0")
                    .fetch_one(self.pool())
                    .await?
            }
        };
        raw.as_deref().map(parse_ts).transpose()
    }

    /// Distinct sources present in the store.
    pub async fn sources(&self) -> Result<Vec<String>> {
        let rows: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT source FROM posts ORDER BY source")
                .fetch_all(self.pool())
                .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::sample_post;

    #[tokio::test]
    async fn create_and_find_round_trip() {
        let store = Store::in_memory().await.unwrap();
        let created = store
            .create_post(&sample_post("mastodon", "m1", "critical exploit found"), false)
            .await
            .unwrap();
        assert!(!created.is_ingested);
        assert!(!created.is_hidden);

        let found = store
            .find_by_source_id("mastodon", "m1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, created);
        assert!(store
            .find_by_source_id("mastodon", "m2")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn filters_select_stage_backlogs() {
        let store = Store::in_memory().await.unwrap();
        let a = store
            .create_post(&sample_post("rss:foo", "a", "one two three"), false)
            .await
            .unwrap();
        let b = store
            .create_post(&sample_post("rss:foo", "b", "four five six"), false)
            .await
            .unwrap();
        store.set_ingested(a.id, true).await.unwrap();

        let backlog = store.find_posts(&PostFilter::uningested()).await.unwrap();
        assert_eq!(backlog.len(), 1);
        assert_eq!(backlog[0].id, b.id);

        store.set_hidden(b.id, true).await.unwrap();
        let untagged = store.find_posts(&PostFilter::untagged()).await.unwrap();
        assert_eq!(untagged.len(), 1);
        assert_eq!(untagged[0].id, a.id);
    }

    #[tokio::test]
    async fn full_text_match_respects_visibility_and_window() {
        let store = Store::in_memory().await.unwrap();
        let visible = store
            .create_post(&sample_post("mastodon", "v", "ransomware report"), false)
            .await
            .unwrap();
        let hidden = store
            .create_post(&sample_post("mastodon", "h", "ransomware noise"), false)
            .await
            .unwrap();
        store
            .set_content_search(visible.id, "ransomware report analysis")
            .await
            .unwrap();
        store
            .set_content_search(hidden.id, "ransomware noise analysis")
            .await
            .unwrap();
        store.set_hidden(hidden.id, true).await.unwrap();

        let earliest = Utc::now() - chrono::Duration::days(1);
        let latest = Utc::now() + chrono::Duration::days(1);
        let hits = store
            .full_text_match("ransomware", &earliest, &latest, 100)
            .await
            .unwrap();
        assert_eq!(hits, vec![visible.id]);
        assert_eq!(store.fts_query_count(), 1);

        // Outside the window nothing matches.
        let far_future = Utc::now() + chrono::Duration::days(2);
        let far_future_end = Utc::now() + chrono::Duration::days(3);
        let hits = store
            .full_text_match("ransomware", &far_future, &far_future_end, 100)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn fts_index_follows_content_search_updates() {
        let store = Store::in_memory().await.unwrap();
        let post = store
            .create_post(&sample_post("mastodon", "u", "placeholder text here"), false)
            .await
            .unwrap();
        let earliest = Utc::now() - chrono::Duration::days(1);
        let latest = Utc::now() + chrono::Duration::days(1);

        store
            .set_content_search(post.id, "first version botnet")
            .await
            .unwrap();
        assert_eq!(
            store
                .full_text_match("botnet", &earliest, &latest, 10)
                .await
                .unwrap(),
            vec![post.id]
        );

        store
            .set_content_search(post.id, "second version phishing")
            .await
            .unwrap();
        assert!(store
            .full_text_match("botnet", &earliest, &latest, 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .full_text_match("phishing", &earliest, &latest, 10)
                .await
                .unwrap(),
            vec![post.id]
        );
    }

    #[tokio::test]
    async fn watermark_queries() {
        let store = Store::in_memory().await.unwrap();
        assert!(store.latest_created_at("bluesky").await.unwrap().is_none());

        let mut older = sample_post("bluesky", "old", "first post body");
        older.created_at = Utc::now() - chrono::Duration::hours(5);
        store.create_post(&older, false).await.unwrap();
        let newer = store
            .create_post(&sample_post("bluesky", "new", "second post body"), false)
            .await
            .unwrap();

        let watermark = store.latest_created_at("bluesky").await.unwrap().unwrap();
        assert_eq!(watermark, newer.created_at);
        assert_eq!(
            store.latest_source_id("bluesky").await.unwrap().unwrap(),
            "new"
        );
        assert_eq!(store.sources().await.unwrap(), vec!["bluesky".to_string()]);
    }
}
