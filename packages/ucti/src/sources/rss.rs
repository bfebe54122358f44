//! RSS/Atom adapter: one producer iterating every configured feed.
//!
//! Each feed maps to its own source tag (`rss:<name>`), so watermarks and
//! healthcheck times stay per-feed. Feed failures accumulate; the remaining
//! feeds are still processed.

use async_trait::async_trait;
use chrono::{Datelike, DateTime, Utc};
use reqwest::Client;

use super::{content::read_html, persist_entry, watermark, Source};
use crate::config::RssFeedConfig;
use crate::error::{ErrorBatch, FetchError, Result, UctiError};
use crate::store::Store;
use crate::types::NewPost;

const FEED_DELAY_SECS: u64 = 10;
/// Entries at or below this token count carry no searchable content.
const MIN_TOKENS: usize = 3;

pub struct RssSource {
    client: Client,
    feeds: Vec<RssFeedConfig>,
}

impl RssSource {
    pub fn new(feeds: Vec<RssFeedConfig>) -> Self {
        Self {
            client: Client::new(),
            feeds,
        }
    }

    fn user_agent() -> String {
        let now = Utc::now();
        format!("RSS Reader {}.{}", now.year(), now.month())
    }

    fn entry_to_new_post(source: &str, entry: &feed_rs::model::Entry) -> Option<NewPost> {
        let created_at: DateTime<Utc> = entry.published.or(entry.updated)?;
        let author = entry.authors.first().map(|a| a.name.clone())?;
        let link = entry.links.first().map(|l| l.href.clone())?;
        let title = entry
            .title
            .as_ref()
            .map(|t| t.content.clone())
            .unwrap_or_default();
        let summary = entry
            .summary
            .as_ref()
            .map(|s| s.content.clone())
            .unwrap_or_default();
        let content_html = format!("{title} {summary}");
        let content_txt = read_html(&content_html);

        let raw = serde_json::json!({
            "id": entry.id,
            "title": title,
            "summary": summary,
            "link": link,
            "author": author,
            "published": created_at,
        });
        Some(NewPost {
            source: source.to_string(),
            source_id: link.clone(),
            user: author,
            url: link,
            created_at,
            content_html,
            content_txt,
            raw: raw.to_string(),
        })
    }

    async fn fetch_feed(
        &self,
        store: &Store,
        feed: &RssFeedConfig,
        new_ids: &mut Vec<i64>,
    ) -> Result<()> {
        tokio::time::sleep(std::time::Duration::from_secs(FEED_DELAY_SECS)).await;

        let min_post_time = watermark(store, &feed.name).await?;
        let body = self
            .client
            .get(&feed.url)
            .header("User-Agent", Self::user_agent())
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let parsed = feed_rs::parser::parse(body.as_ref())
            .map_err(|e| UctiError::Config(format!("cannot parse feed {}: {e}", feed.name)))?;

        for entry in &parsed.entries {
            let Some(post) = Self::entry_to_new_post(&feed.name, entry) else {
                continue;
            };
            if post.created_at < min_post_time {
                continue;
            }
            if post.content_txt.split_whitespace().count() <= MIN_TOKENS {
                continue;
            }
            if let Some(created) = persist_entry(store, post).await? {
                new_ids.push(created.id);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Source for RssSource {
    fn name(&self) -> &'static str {
        "rss"
    }

    async fn fetch(&self, store: &Store) -> Result<Vec<i64>> {
        let mut new_ids = Vec::new();
        let mut errors = ErrorBatch::new();
        for feed in &self.feeds {
            if let Err(error) = self.fetch_feed(store, feed, &mut new_ids).await {
                errors.push(UctiError::Fetch(FetchError::single(
                    format!("error fetching feed {}", feed.name),
                    error,
                )));
            }
        }
        errors.into_result("error fetching RSS feeds")?;
        Ok(new_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0"?>
        <rss version="2.0"><channel>
            <title>Example Intel</title>
            <item>
                <title>Botnet takedown</title>
                <description>Operation dismantles &lt;b&gt;large&lt;/b&gt; botnet infrastructure</description>
                <link>https://intel.example/botnet-takedown</link>
                <author>reporter@intel.example</author>
                <pubDate>Thu, 02 Jan 2025 10:00:00 GMT</pubDate>
            </item>
            <item>
                <title>short</title>
                <description></description>
                <link>https://intel.example/short</link>
                <author>reporter@intel.example</author>
                <pubDate>Thu, 02 Jan 2025 11:00:00 GMT</pubDate>
            </item>
        </channel></rss>"#;

    #[test]
    fn entries_map_to_posts_with_feed_source() {
        let parsed = feed_rs::parser::parse(FEED.as_bytes()).unwrap();
        let post = RssSource::entry_to_new_post("rss:example", &parsed.entries[0]).unwrap();
        assert_eq!(post.source, "rss:example");
        assert_eq!(post.source_id, "https://intel.example/botnet-takedown");
        assert_eq!(
            post.content_txt,
            "Botnet takedown Operation dismantles large botnet infrastructure"
        );
        assert_eq!(post.created_at.to_rfc3339(), "2025-01-02T10:00:00+00:00");
    }

    #[test]
    fn short_entries_fall_under_token_floor() {
        let parsed = feed_rs::parser::parse(FEED.as_bytes()).unwrap();
        let post = RssSource::entry_to_new_post("rss:example", &parsed.entries[1]).unwrap();
        assert!(post.content_txt.split_whitespace().count() <= MIN_TOKENS);
    }
}
