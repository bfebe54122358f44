//! Search-result cache.
//!
//! Payloads are gzipped binary encodings of the scored hit list, written
//! once under `<expiration_unix>_<sha256-hex>.bin.gz`; a `search_cache` row
//! points at the file. Readers trust the row, not the file: an unexpired row
//! with a missing file is simply a miss, and deletion is best-effort.
//!
//! While a query's row is alive, saving it again is a no-op, so two
//! concurrent identical searches that both miss cannot strand the first
//! payload file. Only an expired leftover row is replaced, and its stale
//! file is removed first.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};

use super::SearchHit;
use crate::error::{Result, UctiError};
use crate::store::Store;

/// File-backed result cache keyed by the canonical query.
#[derive(Debug, Clone)]
pub struct SearchCache {
    dir: PathBuf,
}

impl SearchCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// SHA-256 of the canonical query, hex-encoded.
    pub fn query_hash(query: &str) -> String {
        hex::encode(Sha256::digest(query.as_bytes()))
    }

    /// Return the cached hits when an unexpired row and its payload file
    /// both exist.
    pub async fn fetch(&self, store: &Store, query: &str) -> Result<Option<Vec<SearchHit>>> {
        let Some(row) = store.cache_row_by_hash(&Self::query_hash(query)).await? else {
            return Ok(None);
        };
        if row.expires_at <= Utc::now() {
            return Ok(None);
        }
        let path = self.dir.join(&row.filepath);
        if !path.exists() {
            return Ok(None);
        }

        let file = std::fs::File::open(&path)?;
        let mut decoder = GzDecoder::new(file);
        let mut payload = Vec::new();
        decoder.read_to_end(&mut payload)?;
        let hits = bincode::deserialize(&payload)
            .map_err(|e| UctiError::CachePayload(e.to_string()))?;
        Ok(Some(hits))
    }

    /// Write the payload file and record its row. A no-op while an
    /// unexpired row for this query exists (a concurrent search got there
    /// first); an expired leftover is replaced and its file swept.
    pub async fn save(
        &self,
        store: &Store,
        query: &str,
        hits: &[SearchHit],
        expires_at: &DateTime<Utc>,
    ) -> Result<()> {
        let hash = Self::query_hash(query);
        if let Some(existing) = store.cache_row_by_hash(&hash).await? {
            if existing.expires_at > Utc::now() {
                return Ok(());
            }
            if let Err(error) = std::fs::remove_file(self.dir.join(&existing.filepath)) {
                tracing::debug!(file = %existing.filepath, %error, "stale cache file already gone");
            }
        }
        let filename = format!("{}_{}.bin.gz", expires_at.timestamp(), hash);
        let path = self.dir.join(&filename);

        let payload =
            bincode::serialize(hits).map_err(|e| UctiError::CachePayload(e.to_string()))?;
        let file = std::fs::File::create(&path)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&payload)?;
        encoder.finish()?;

        store.upsert_cache_row(&hash, query, expires_at, &filename).await
    }

    /// Delete every expired row and its payload file. File removal is
    /// best-effort; a vanished file only logs.
    pub async fn expire(&self, store: &Store) -> Result<usize> {
        let expired = store.expired_cache_rows(&Utc::now()).await?;
        let count = expired.len();
        for entry in expired {
            tracing::info!(query = %entry.query, "expiring cached search");
            if let Err(error) = std::fs::remove_file(self.dir.join(&entry.filepath)) {
                tracing::debug!(file = %entry.filepath, %error, "cache file already gone");
            }
            store.delete_cache_row(entry.id).await?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::PostScore;
    use crate::testing::sample_post;

    async fn hit(store: &Store) -> SearchHit {
        let post = store
            .create_post(&sample_post("mastodon", "1", "cached search result body"), false)
            .await
            .unwrap();
        SearchHit {
            post,
            tags: vec!["#MALWARE".into()],
            score: PostScore {
                relevancy_score: 87,
                distinct_score: 0,
            },
        }
    }

    #[tokio::test]
    async fn round_trip_before_expiry() {
        let store = Store::in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let cache = SearchCache::new(dir.path());
        let hits = vec![hit(&store).await];

        let expires = Utc::now() + chrono::Duration::hours(1);
        cache.save(&store, "malware !count:5", &hits, &expires).await.unwrap();

        let fetched = cache
            .fetch(&store, "malware !count:5")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched, hits);
    }

    #[tokio::test]
    async fn saving_over_a_live_row_is_a_no_op() {
        let store = Store::in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let cache = SearchCache::new(dir.path());
        let hits = vec![hit(&store).await];

        let expires = Utc::now() + chrono::Duration::hours(1);
        cache.save(&store, "q", &hits, &expires).await.unwrap();

        // A concurrent identical search computed its own result meanwhile.
        let mut competing = hits.clone();
        competing[0].score.relevancy_score = 1;
        let later = Utc::now() + chrono::Duration::hours(2);
        cache.save(&store, "q", &competing, &later).await.unwrap();

        // The first payload and row win; no orphan file appears.
        let fetched = cache.fetch(&store, "q").await.unwrap().unwrap();
        assert_eq!(fetched, hits);
        let row = store
            .cache_row_by_hash(&SearchCache::query_hash("q"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.expires_at, expires);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn replacing_an_expired_row_sweeps_its_file() {
        let store = Store::in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let cache = SearchCache::new(dir.path());
        let hits = vec![hit(&store).await];

        let past = Utc::now() - chrono::Duration::hours(1);
        cache.save(&store, "q", &hits, &past).await.unwrap();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);

        let future = Utc::now() + chrono::Duration::hours(1);
        cache.save(&store, "q", &hits, &future).await.unwrap();

        assert_eq!(cache.fetch(&store, "q").await.unwrap().unwrap(), hits);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn expired_rows_miss() {
        let store = Store::in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let cache = SearchCache::new(dir.path());
        let hits = vec![hit(&store).await];

        let expires = Utc::now() - chrono::Duration::seconds(1);
        cache.save(&store, "q", &hits, &expires).await.unwrap();
        assert!(cache.fetch(&store, "q").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_file_is_a_miss_not_an_error() {
        let store = Store::in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let cache = SearchCache::new(dir.path());
        let hits = vec![hit(&store).await];

        let expires = Utc::now() + chrono::Duration::hours(1);
        cache.save(&store, "q", &hits, &expires).await.unwrap();
        for entry in std::fs::read_dir(dir.path()).unwrap() {
            std::fs::remove_file(entry.unwrap().path()).unwrap();
        }
        assert!(cache.fetch(&store, "q").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expire_removes_rows_and_files() {
        let store = Store::in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let cache = SearchCache::new(dir.path());
        let hits = vec![hit(&store).await];

        let past = Utc::now() - chrono::Duration::hours(1);
        let future = Utc::now() + chrono::Duration::hours(1);
        cache.save(&store, "old", &hits, &past).await.unwrap();
        cache.save(&store, "fresh", &hits, &future).await.unwrap();

        assert_eq!(cache.expire(&store).await.unwrap(), 1);
        assert!(store
            .cache_row_by_hash(&SearchCache::query_hash("old"))
            .await
            .unwrap()
            .is_none());
        assert!(cache.fetch(&store, "fresh").await.unwrap().is_some());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
