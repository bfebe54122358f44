//! Mastodon home-timeline adapter.
//!
//! Pages backwards through `/api/v1/timelines/home` from the newest status
//! down to the stored watermark (the source-native status id). Respects the
//! instance rate-limit headers: when the per-call budget is nearly spent the
//! adapter sleeps until the declared reset.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::{content::read_html, persist_entry, Source};
use crate::config::MastodonConfig;
use crate::error::Result;
use crate::store::Store;
use crate::types::NewPost;

const SOURCE: &str = "mastodon";
const PAGE_DELAY_SECS: u64 = 1;

#[derive(Debug, Deserialize)]
struct Status {
    id: String,
    created_at: DateTime<Utc>,
    content: String,
    url: Option<String>,
    uri: String,
    account: Account,
    #[serde(flatten)]
    rest: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct Account {
    acct: String,
    #[serde(flatten)]
    rest: serde_json::Value,
}

pub struct MastodonSource {
    client: Client,
    config: MastodonConfig,
    /// Statuses older than this are never backfilled
    backfill_cutoff: DateTime<Utc>,
}

impl MastodonSource {
    pub fn new(config: MastodonConfig) -> Self {
        Self {
            client: Client::new(),
            config,
            backfill_cutoff: Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap(),
        }
    }

    async fn timeline_page(
        &self,
        min_id: Option<&str>,
        max_id: Option<&str>,
    ) -> Result<(Vec<Status>, RateLimit)> {
        let mut request = self
            .client
            .get(format!(
                "{}/api/v1/timelines/home",
                self.config.api_base_url.trim_end_matches('/')
            ))
            .bearer_auth(&self.config.access_token)
            .query(&[("limit", "40")]);
        if let Some(min_id) = min_id {
            request = request.query(&[("min_id", min_id)]);
        }
        if let Some(max_id) = max_id {
            request = request.query(&[("max_id", max_id)]);
        }

        let response = request.send().await?.error_for_status()?;
        let rate_limit = RateLimit::from_headers(response.headers());
        let statuses: Vec<Status> = response.json().await?;
        Ok((statuses, rate_limit))
    }

    fn to_new_post(&self, status: &Status) -> NewPost {
        let content_txt = read_html(&status.content);
        let raw = serde_json::json!({
            "id": status.id,
            "created_at": status.created_at,
            "content": status.content,
            "url": status.url,
            "uri": status.uri,
            "account": { "acct": status.account.acct, "rest": status.account.rest },
            "rest": status.rest,
        });
        NewPost {
            source: SOURCE.to_string(),
            source_id: status.id.clone(),
            user: status.account.acct.clone(),
            url: status.url.clone().unwrap_or_else(|| status.uri.clone()),
            created_at: status.created_at,
            content_html: status.content.clone(),
            content_txt,
            raw: raw.to_string(),
        }
    }
}

#[async_trait]
impl Source for MastodonSource {
    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn fetch(&self, store: &Store) -> Result<Vec<i64>> {
        let min_id = store.latest_source_id(SOURCE).await?;
        let mut max_id: Option<String> = None;
        let mut new_ids = Vec::new();

        loop {
            let (page, rate_limit) = self
                .timeline_page(min_id.as_deref(), max_id.as_deref())
                .await?;
            let Some(last) = page.last() else {
                tracing::info!("nothing more to check, exiting");
                break;
            };
            max_id = Some(last.id.clone());

            let mut reached_cutoff = false;
            for status in &page {
                if status.created_at <= self.backfill_cutoff {
                    tracing::info!("backfill cutoff reached, exiting");
                    reached_cutoff = true;
                    break;
                }
                if let Some(post) = persist_entry(store, self.to_new_post(status)).await? {
                    new_ids.push(post.id);
                }
            }
            if reached_cutoff {
                break;
            }

            tracing::info!(
                fetched_up_to = %last.created_at,
                requests_left = rate_limit.remaining,
                "fetched timeline page"
            );
            if rate_limit.remaining <= 1 {
                if let Some(reset) = rate_limit.reset {
                    let wait = (reset - Utc::now()).num_seconds().max(0) as u64;
                    tracing::info!(seconds = wait, "rate limit reached, sleeping until reset");
                    tokio::time::sleep(std::time::Duration::from_secs(wait)).await;
                }
            }
            tokio::time::sleep(std::time::Duration::from_secs(PAGE_DELAY_SECS)).await;
        }

        Ok(new_ids)
    }
}

/// Instance rate-limit state, read from response headers.
struct RateLimit {
    remaining: i64,
    reset: Option<DateTime<Utc>>,
}

impl RateLimit {
    fn from_headers(headers: &reqwest::header::HeaderMap) -> Self {
        let remaining = headers
            .get("X-RateLimit-Remaining")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(i64::MAX);
        let reset = headers
            .get("X-RateLimit-Reset")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
            .map(|dt| dt.with_timezone(&Utc));
        Self { remaining, reset }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(id: &str, content: &str) -> Status {
        Status {
            id: id.into(),
            created_at: Utc::now(),
            content: content.into(),
            url: Some(format!("https://infosec.exchange/@x/{id}")),
            uri: format!("https://infosec.exchange/users/x/statuses/{id}"),
            account: Account {
                acct: "x@infosec.exchange".into(),
                rest: serde_json::Value::Null,
            },
            rest: serde_json::Value::Null,
        }
    }

    #[test]
    fn status_conversion_strips_markup() {
        let source = MastodonSource::new(MastodonConfig {
            client_id: "id".into(),
            client_secret: "secret".into(),
            access_token: "token".into(),
            api_base_url: "https://infosec.exchange".into(),
        });
        let post = source.to_new_post(&status("42", "<p>New <b>0day</b> dropped</p>"));
        assert_eq!(post.source, "mastodon");
        assert_eq!(post.source_id, "42");
        assert_eq!(post.content_txt, "New 0day dropped");
        assert!(post.url.contains("infosec.exchange"));
    }

    #[test]
    fn missing_rate_limit_headers_mean_no_throttle() {
        let limit = RateLimit::from_headers(&reqwest::header::HeaderMap::new());
        assert!(limit.remaining > 1);
        assert!(limit.reset.is_none());
    }
}
