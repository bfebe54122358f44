//! Source adapters.
//!
//! One adapter per external source. All adapters follow the same contract:
//! compute a per-source watermark, enumerate entries newest-first down to the
//! watermark, convert each entry into a [`NewPost`], skip duplicates by
//! `(source, source_id)`, and persist the rest. Trivially short posts are
//! marked ingested at creation so enrichment never sees them.
//!
//! Ingestion fans all configured adapters out concurrently; a failing
//! adapter never cancels its siblings, and every failure is preserved inside
//! the returned [`FetchError`] children.

pub mod airtable;
pub mod baserow;
pub mod bluesky;
pub mod content;
pub mod mastodon;
pub mod rss;
pub mod telegram;

pub use airtable::AirtableSource;
pub use baserow::BaserowSource;
pub use bluesky::BlueskySource;
pub use content::{read_html, read_markdown};
pub use mastodon::MastodonSource;
pub use rss::RssSource;
pub use telegram::{TelegramApi, TelegramDialog, TelegramMessage, TelegramSource};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::config::Config;
use crate::error::{FetchError, Result, UctiError};
use crate::store::Store;
use crate::types::{NewPost, Post};

/// A lazy producer of posts against the store.
#[async_trait]
pub trait Source: Send + Sync {
    /// Short source label used in logs and error messages.
    fn name(&self) -> &'static str;

    /// Fetch new entries and persist them; returns the ids of newly created
    /// posts in fetch order.
    async fn fetch(&self, store: &Store) -> Result<Vec<i64>>;
}

/// Result of one adapter run within an ingest sweep.
pub struct SourceRun {
    pub source: &'static str,
    pub post_ids: Vec<i64>,
    pub error: Option<UctiError>,
}

/// Persist one converted entry, skipping existing `(source, source_id)`.
/// First-write semantics: duplicates never touch the stored row.
pub async fn persist_entry(store: &Store, entry: NewPost) -> Result<Option<Post>> {
    if store
        .find_by_source_id(&entry.source, &entry.source_id)
        .await?
        .is_some()
    {
        return Ok(None);
    }
    let early_ingested = entry.is_trivially_short();
    let post = store.create_post(&entry, early_ingested).await?;
    Ok(Some(post))
}

/// Per-source watermark: the newest stored `created_at`, defaulting to one
/// day back when the store has nothing for this source.
pub async fn watermark(store: &Store, source: &str) -> Result<DateTime<Utc>> {
    Ok(store
        .latest_created_at(source)
        .await?
        .unwrap_or_else(|| Utc::now() - Duration::days(1)))
}

/// Every adapter the configuration enables. The Telegram transport is an
/// external collaborator; when none is supplied the adapter stays disabled.
pub fn enabled_sources(
    config: &Config,
    telegram_api: Option<std::sync::Arc<dyn TelegramApi>>,
) -> Vec<Box<dyn Source>> {
    let mut sources: Vec<Box<dyn Source>> = Vec::new();
    if let Some(mastodon) = &config.mastodon {
        sources.push(Box::new(MastodonSource::new(mastodon.clone())));
    }
    if let Some(bluesky) = &config.bluesky {
        sources.push(Box::new(BlueskySource::new(bluesky.clone())));
    }
    if let Some(airtable) = &config.airtable {
        sources.push(Box::new(AirtableSource::new(airtable.clone())));
    }
    if let Some(baserow) = &config.baserow {
        sources.push(Box::new(BaserowSource::new(baserow.clone())));
    }
    if !config.rss.is_empty() {
        sources.push(Box::new(RssSource::new(config.rss.values().cloned().collect())));
    }
    if let (Some(telegram), Some(api)) = (&config.telegram, telegram_api) {
        sources.push(Box::new(TelegramSource::new(telegram.clone(), api)));
    }
    sources
}

/// Run every adapter concurrently. Partial success is the norm: each run
/// records its own error (already a compound for multi-feed adapters) and
/// the ids it managed to persist before failing.
pub async fn fetch_all(store: &Store, sources: &[Box<dyn Source>]) -> Vec<SourceRun> {
    let runs = sources.iter().map(|source| async move {
        let name = source.name();
        tracing::info!(source = name, "fetching source");
        match source.fetch(store).await {
            Ok(post_ids) => {
                tracing::info!(source = name, new_posts = post_ids.len(), "source fetched");
                SourceRun {
                    source: name,
                    post_ids,
                    error: None,
                }
            }
            Err(error) => {
                tracing::warn!(source = name, %error, "source fetch failed");
                SourceRun {
                    source: name,
                    post_ids: Vec::new(),
                    error: Some(error),
                }
            }
        }
    });
    futures::future::join_all(runs).await
}

/// Collapse run errors into a single compound, or `Ok` on a clean sweep.
pub fn aggregate_errors(runs: Vec<SourceRun>) -> (Vec<(&'static str, Vec<i64>)>, Result<()>) {
    let mut ids = Vec::new();
    let mut errors = Vec::new();
    for run in runs {
        ids.push((run.source, run.post_ids));
        if let Some(error) = run.error {
            errors.push(UctiError::Fetch(FetchError::single(
                format!("error fetching {} posts", run.source),
                error,
            )));
        }
    }
    let result = if errors.is_empty() {
        Ok(())
    } else {
        Err(FetchError::new("error fetching posts", errors).into())
    };
    (ids, result)
}
