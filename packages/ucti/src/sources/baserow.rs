//! Baserow staging-table adapter. Same consume-on-read semantics as the
//! Airtable drop-box, against a self-hosted Baserow instance.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::{persist_entry, Source};
use crate::config::BaserowConfig;
use crate::error::Result;
use crate::store::Store;
use crate::types::NewPost;

#[derive(Debug, Deserialize)]
struct RowPage {
    results: Vec<serde_json::Value>,
}

pub struct BaserowSource {
    client: Client,
    config: BaserowConfig,
}

impl BaserowSource {
    pub fn new(config: BaserowConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn rows_url(&self) -> String {
        format!(
            "{}/database/rows/table/{}/",
            self.config.base_url.trim_end_matches('/'),
            self.config.table_id
        )
    }

    fn auth_header(&self) -> String {
        format!("Token {}", self.config.api_key)
    }

    fn row_to_new_post(row: &serde_json::Value) -> Option<NewPost> {
        let row_id = row.get("id")?.as_i64()?;
        let created_at = row
            .get("created_on")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let text = |key: &str| {
            row.get(key)
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string()
        };
        let source = match row.get("Source").and_then(|v| v.as_str()) {
            Some(s) if !s.is_empty() => s.to_string(),
            _ => "baserow".to_string(),
        };
        let source_id = match row.get("Id") {
            Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => row_id.to_string(),
        };
        let content = text("Content");
        Some(NewPost {
            source,
            source_id,
            user: text("Account"),
            url: text("Link"),
            created_at,
            content_html: content.clone(),
            content_txt: content,
            raw: row.to_string(),
        })
    }
}

#[async_trait]
impl Source for BaserowSource {
    fn name(&self) -> &'static str {
        "baserow"
    }

    async fn fetch(&self, store: &Store) -> Result<Vec<i64>> {
        let page: RowPage = self
            .client
            .get(format!("{}?user_field_names=true", self.rows_url()))
            .header("Authorization", self.auth_header())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut new_ids = Vec::new();
        for row in &page.results {
            let Some(row_id) = row.get("id").and_then(|v| v.as_i64()) else {
                continue;
            };
            let Some(entry) = Self::row_to_new_post(row) else {
                continue;
            };
            if let Some(post) = persist_entry(store, entry).await? {
                new_ids.push(post.id);
            }
            self.client
                .delete(format!("{}{row_id}/", self.rows_url()))
                .header("Authorization", self.auth_header())
                .send()
                .await?
                .error_for_status()?;
        }
        Ok(new_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_defaults_cover_missing_fields() {
        let row = serde_json::json!({
            "id": 7,
            "Content": "wiper sample shared in channel",
        });
        let post = BaserowSource::row_to_new_post(&row).unwrap();
        assert_eq!(post.source, "baserow");
        assert_eq!(post.source_id, "7");
        assert_eq!(post.user, "");
        assert_eq!(post.content_txt, "wiper sample shared in channel");
    }

    #[test]
    fn explicit_source_and_id_win() {
        let row = serde_json::json!({
            "id": 7,
            "Id": "ext-1",
            "Source": "telegram-mirror",
            "Content": "c2 list attached",
            "created_on": "2025-03-01T12:00:00+00:00",
        });
        let post = BaserowSource::row_to_new_post(&row).unwrap();
        assert_eq!(post.source, "telegram-mirror");
        assert_eq!(post.source_id, "ext-1");
        assert_eq!(
            post.created_at,
            DateTime::parse_from_rfc3339("2025-03-01T12:00:00+00:00").unwrap()
        );
    }
}
