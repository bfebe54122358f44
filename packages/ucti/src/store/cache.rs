//! Search-cache rows. The payload files live in the cache directory and are
//! managed by `search::cache`; the store only tracks metadata.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use super::{fmt_ts, parse_ts, Store};
use crate::error::Result;
use crate::types::SearchCacheEntry;

#[derive(Debug, FromRow)]
struct CacheRow {
    id: i64,
    query_hash: String,
    query: String,
    expires_at: String,
    filepath: String,
}

impl CacheRow {
    fn into_entry(self) -> Result<SearchCacheEntry> {
        Ok(SearchCacheEntry {
            id: self.id,
            query_hash: self.query_hash,
            query: self.query,
            expires_at: parse_ts(&self.expires_at)?,
            filepath: self.filepath,
        })
    }
}

impl Store {
    pub async fn cache_row_by_hash(&self, query_hash: &str) -> Result<Option<SearchCacheEntry>> {
        let row: Option<CacheRow> = sqlx::query_as(
            "SELECT id, query_hash, query, expires_at, filepath FROM search_cache \
             WHERE query_hash = ?1",
        )
        .bind(query_hash)
        .fetch_optional(self.pool())
        .await?;
        row.map(CacheRow::into_entry).transpose()
    }

    /// Record a payload file, replacing any previous row for the query.
    /// The cache layer only calls this when no live row exists.
    pub async fn upsert_cache_row(
        &self,
        query_hash: &str,
        query: &str,
        expires_at: &DateTime<Utc>,
        filepath: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO search_cache (query_hash, query, expires_at, filepath) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(query_hash) DO UPDATE SET \
                 query = excluded.query, \
                 expires_at = excluded.expires_at, \
                 filepath = excluded.filepath",
        )
        .bind(query_hash)
        .bind(query)
        .bind(fmt_ts(expires_at))
        .bind(filepath)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Rows whose expiry has passed; the expire job deletes row and file.
    pub async fn expired_cache_rows(&self, now: &DateTime<Utc>) -> Result<Vec<SearchCacheEntry>> {
        let rows: Vec<CacheRow> = sqlx::query_as(
            "SELECT id, query_hash, query, expires_at, filepath FROM search_cache \
             WHERE expires_at < ?1",
        )
        .bind(fmt_ts(now))
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(CacheRow::into_entry).collect()
    }

    pub async fn delete_cache_row(&self, id: i64) -> Result<()> {
        sqlx::query("DELETE FROM search_cache WHERE id = ?1")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rows_round_trip_and_expire() {
        let store = Store::in_memory().await.unwrap();
        let expires = Utc::now() + chrono::Duration::hours(1);
        store
            .upsert_cache_row("abc123", "malware !count:5", &expires, "123_abc.bin.gz")
            .await
            .unwrap();

        let row = store.cache_row_by_hash("abc123").await.unwrap().unwrap();
        assert_eq!(row.query, "malware !count:5");
        assert_eq!(row.expires_at, expires);

        assert!(store
            .expired_cache_rows(&Utc::now())
            .await
            .unwrap()
            .is_empty());
        let later = Utc::now() + chrono::Duration::hours(2);
        let expired = store.expired_cache_rows(&later).await.unwrap();
        assert_eq!(expired.len(), 1);

        store.delete_cache_row(expired[0].id).await.unwrap();
        assert!(store.cache_row_by_hash("abc123").await.unwrap().is_none());
    }
}
