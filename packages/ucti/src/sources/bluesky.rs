//! Bluesky feed adapter.
//!
//! Authenticates with an app password over XRPC, then walks each configured
//! feed generator with cursor paging, stopping once entries fall behind the
//! watermark. Pages are fetched serially with a long pause to stay friendly
//! to the AppView.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::{persist_entry, watermark, Source};
use crate::config::BlueskyConfig;
use crate::error::{ErrorBatch, Result, UctiError};
use crate::store::Store;
use crate::types::NewPost;

const SOURCE: &str = "bluesky";
const XRPC_BASE: &str = "https://bsky.social/xrpc";
const PAGE_DELAY_SECS: u64 = 10;
const PAGE_LIMIT: u32 = 50;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Session {
    access_jwt: String,
}

#[derive(Debug, Deserialize)]
struct FeedPage {
    cursor: Option<String>,
    feed: Vec<FeedItem>,
}

#[derive(Debug, Deserialize)]
struct FeedItem {
    post: FeedPost,
}

#[derive(Debug, Deserialize)]
struct FeedPost {
    uri: String,
    cid: String,
    author: FeedAuthor,
    record: FeedRecord,
}

#[derive(Debug, Deserialize)]
struct FeedAuthor {
    handle: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedRecord {
    text: String,
    created_at: DateTime<Utc>,
}

pub struct BlueskySource {
    client: Client,
    config: BlueskyConfig,
}

impl BlueskySource {
    pub fn new(config: BlueskyConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    async fn login(&self) -> Result<Session> {
        let response = self
            .client
            .post(format!("{XRPC_BASE}/com.atproto.server.createSession"))
            .json(&serde_json::json!({
                "identifier": self.config.handle,
                "password": self.config.app_password,
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn feed_page(
        &self,
        session: &Session,
        feed: &str,
        cursor: &str,
    ) -> Result<FeedPage> {
        let response = self
            .client
            .get(format!("{XRPC_BASE}/app.bsky.feed.getFeed"))
            .bearer_auth(&session.access_jwt)
            .header("Accept-Language", "en")
            .query(&[
                ("feed", feed),
                ("limit", &PAGE_LIMIT.to_string()),
                ("cursor", cursor),
            ])
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    fn to_new_post(item: &FeedPost, feed: &str) -> NewPost {
        let record_key = item.uri.rsplit('/').next().unwrap_or(&item.cid);
        let raw = serde_json::json!({
            "uri": item.uri,
            "cid": item.cid,
            "author": item.author.handle,
            "text": item.record.text,
            "created_at": item.record.created_at,
            "$feed": feed,
        });
        NewPost {
            source: SOURCE.to_string(),
            source_id: item.cid.clone(),
            user: item.author.handle.clone(),
            url: format!(
                "https://bsky.app/profile/{}/post/{record_key}",
                item.author.handle
            ),
            created_at: item.record.created_at,
            // Bluesky records are plain text already
            content_html: item.record.text.clone(),
            content_txt: item.record.text.clone(),
            raw: raw.to_string(),
        }
    }

    async fn fetch_feed(
        &self,
        store: &Store,
        session: &Session,
        feed: &str,
        min_time: DateTime<Utc>,
        new_ids: &mut Vec<i64>,
    ) -> Result<()> {
        let mut cursor = String::new();
        loop {
            let page = self.feed_page(session, feed, &cursor).await?;
            tokio::time::sleep(std::time::Duration::from_secs(PAGE_DELAY_SECS)).await;

            for item in &page.feed {
                if item.post.record.created_at < min_time {
                    return Ok(());
                }
                if let Some(post) = persist_entry(store, Self::to_new_post(&item.post, feed)).await?
                {
                    new_ids.push(post.id);
                }
            }

            match page.cursor {
                Some(next) if !page.feed.is_empty() => cursor = next,
                _ => return Ok(()),
            }
        }
    }
}

#[async_trait]
impl Source for BlueskySource {
    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn fetch(&self, store: &Store) -> Result<Vec<i64>> {
        let session = self.login().await?;
        let min_time = watermark(store, SOURCE).await?;

        let mut new_ids = Vec::new();
        let mut errors = ErrorBatch::new();
        for feed in &self.config.feeds {
            if let Err(error) = self
                .fetch_feed(store, &session, feed, min_time, &mut new_ids)
                .await
            {
                errors.push(UctiError::Fetch(crate::error::FetchError::single(
                    format!("error fetching feed {feed}"),
                    error,
                )));
            }
        }
        errors.into_result("error fetching feeds")?;
        Ok(new_ids)
    }
}
