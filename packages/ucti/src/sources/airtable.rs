//! Airtable staging-table adapter.
//!
//! The table is a drop-box filled by external automations; every record is
//! consumed (persisted, then deleted) on each sweep. Records missing the
//! required fields are left in place for manual inspection.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::{persist_entry, Source};
use crate::config::AirtableConfig;
use crate::error::Result;
use crate::store::Store;
use crate::types::NewPost;

const API_BASE: &str = "https://api.airtable.com/v0";

#[derive(Debug, Deserialize)]
struct RecordPage {
    records: Vec<Record>,
    offset: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Record {
    id: String,
    #[serde(rename = "createdTime")]
    created_time: DateTime<Utc>,
    fields: serde_json::Value,
}

impl Record {
    /// Map the staging fields onto a post; `None` when a required field is
    /// missing.
    fn to_new_post(&self) -> Option<NewPost> {
        let fields = self.fields.as_object()?;
        let user = fields.get("Account")?.as_str()?.to_string();
        let content = fields.get("Content")?.as_str()?.to_string();
        let url = fields.get("Link")?.as_str()?.to_string();
        let source = fields.get("Source")?.as_str()?.to_string();
        let source_id = match fields.get("Id")? {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Number(n) => n.to_string(),
            _ => return None,
        };
        Some(NewPost {
            source,
            source_id,
            user,
            url,
            created_at: self.created_time,
            content_html: content.clone(),
            content_txt: content,
            raw: self.fields.to_string(),
        })
    }
}

pub struct AirtableSource {
    client: Client,
    config: AirtableConfig,
}

impl AirtableSource {
    pub fn new(config: AirtableConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    fn table_url(&self) -> String {
        format!("{API_BASE}/{}/{}", self.config.base_id, self.config.table_id)
    }

    async fn list_records(&self) -> Result<Vec<Record>> {
        let mut records = Vec::new();
        let mut offset: Option<String> = None;
        loop {
            let mut request = self
                .client
                .get(self.table_url())
                .bearer_auth(&self.config.api_key);
            if let Some(offset) = &offset {
                request = request.query(&[("offset", offset)]);
            }
            let page: RecordPage = request.send().await?.error_for_status()?.json().await?;
            records.extend(page.records);
            match page.offset {
                Some(next) => offset = Some(next),
                None => return Ok(records),
            }
        }
    }

    async fn delete_record(&self, record_id: &str) -> Result<()> {
        self.client
            .delete(format!("{}/{record_id}", self.table_url()))
            .bearer_auth(&self.config.api_key)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Source for AirtableSource {
    fn name(&self) -> &'static str {
        "airtable"
    }

    async fn fetch(&self, store: &Store) -> Result<Vec<i64>> {
        let mut new_ids = Vec::new();
        for record in self.list_records().await? {
            let Some(entry) = record.to_new_post() else {
                continue;
            };
            if let Some(post) = persist_entry(store, entry).await? {
                new_ids.push(post.id);
            }
            self.delete_record(&record.id).await?;
        }
        Ok(new_ids)
    }
}
