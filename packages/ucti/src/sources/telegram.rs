//! Telegram channel adapter.
//!
//! The MTProto transport is an external collaborator: the adapter only needs
//! to list dialogs, acknowledge unread messages and read the unread slice of
//! the configured chats, so it is written against the [`TelegramApi`] seam.
//! Message bodies are authoritative markdown and go through the
//! markdown→HTML→text path.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{content::read_markdown, persist_entry, Source};
use crate::config::TelegramConfig;
use crate::error::{ErrorBatch, FetchError, Result, UctiError};
use crate::store::Store;
use crate::types::NewPost;

const SOURCE: &str = "telegram";

/// One conversation as the transport reports it.
#[derive(Debug, Clone)]
pub struct TelegramDialog {
    pub id: i64,
    pub name: String,
    pub unread_count: usize,
}

/// One message inside a dialog.
#[derive(Debug, Clone)]
pub struct TelegramMessage {
    pub id: i64,
    /// Markdown body
    pub text: String,
    pub date: DateTime<Utc>,
    pub sender_id: Option<i64>,
}

/// Minimal transport interface the adapter needs.
#[async_trait]
pub trait TelegramApi: Send + Sync {
    async fn dialogs(&self) -> Result<Vec<TelegramDialog>>;

    /// Acknowledge everything unread in the dialog.
    async fn mark_read(&self, dialog_id: i64) -> Result<()>;

    /// Newest `limit` messages of the dialog, newest first.
    async fn recent_messages(&self, dialog_id: i64, limit: usize) -> Result<Vec<TelegramMessage>>;
}

pub struct TelegramSource {
    chats: HashSet<String>,
    api: Arc<dyn TelegramApi>,
}

impl TelegramSource {
    pub fn new(config: TelegramConfig, api: Arc<dyn TelegramApi>) -> Self {
        Self {
            chats: config.chats.into_iter().collect(),
            api,
        }
    }

    fn to_new_post(dialog: &TelegramDialog, message: &TelegramMessage) -> NewPost {
        let url = format!("https://t.me/c/{}/{}", dialog.id, message.id);
        let raw = serde_json::json!({
            "url": url,
            "content": message.text,
            "created_at": message.date,
            "source": SOURCE,
            "sender_id": message.sender_id,
        });
        NewPost {
            source: SOURCE.to_string(),
            source_id: message.id.to_string(),
            user: dialog.name.clone(),
            url,
            created_at: message.date,
            content_html: message.text.clone(),
            content_txt: read_markdown(&message.text),
            raw: raw.to_string(),
        }
    }
}

#[async_trait]
impl Source for TelegramSource {
    fn name(&self) -> &'static str {
        SOURCE
    }

    async fn fetch(&self, store: &Store) -> Result<Vec<i64>> {
        let mut new_ids = Vec::new();
        let mut errors = ErrorBatch::new();

        for dialog in self.api.dialogs().await? {
            if !self.chats.contains(&dialog.name) || dialog.unread_count == 0 {
                continue;
            }
            self.api.mark_read(dialog.id).await?;
            let messages = self
                .api
                .recent_messages(dialog.id, dialog.unread_count)
                .await?;
            for message in messages {
                let entry = Self::to_new_post(&dialog, &message);
                match persist_entry(store, entry).await {
                    Ok(Some(post)) => new_ids.push(post.id),
                    Ok(None) => {}
                    Err(error) => errors.push(UctiError::Fetch(FetchError::single(
                        format!("error ingesting message {}", message.id),
                        error,
                    ))),
                }
            }
        }

        errors.into_result("error fetching Telegram posts")?;
        Ok(new_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct ScriptedApi {
        dialogs: Vec<TelegramDialog>,
        messages: Vec<TelegramMessage>,
        read_acks: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl TelegramApi for ScriptedApi {
        async fn dialogs(&self) -> Result<Vec<TelegramDialog>> {
            Ok(self.dialogs.clone())
        }

        async fn mark_read(&self, dialog_id: i64) -> Result<()> {
            self.read_acks.lock().unwrap().push(dialog_id);
            Ok(())
        }

        async fn recent_messages(
            &self,
            _dialog_id: i64,
            limit: usize,
        ) -> Result<Vec<TelegramMessage>> {
            Ok(self.messages.iter().take(limit).cloned().collect())
        }
    }

    fn config(chats: &[&str]) -> TelegramConfig {
        TelegramConfig {
            api_id: 1,
            api_hash: "hash".into(),
            chats: chats.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn reads_only_configured_dialogs_with_unread_messages() {
        let store = Store::in_memory().await.unwrap();
        let api = Arc::new(ScriptedApi {
            dialogs: vec![
                TelegramDialog {
                    id: 100,
                    name: "Threat Intel Digest".into(),
                    unread_count: 1,
                },
                TelegramDialog {
                    id: 200,
                    name: "Cat Pictures".into(),
                    unread_count: 5,
                },
                TelegramDialog {
                    id: 300,
                    name: "Quiet Channel".into(),
                    unread_count: 0,
                },
            ],
            messages: vec![TelegramMessage {
                id: 9,
                text: "**Alert**: new [loader](https://evil.example) spotted".into(),
                date: Utc::now(),
                sender_id: Some(42),
            }],
            read_acks: Mutex::new(Vec::new()),
        });

        let source = TelegramSource::new(config(&["Threat Intel Digest", "Quiet Channel"]), api.clone());
        let ids = source.fetch(&store).await.unwrap();

        assert_eq!(ids.len(), 1);
        assert_eq!(*api.read_acks.lock().unwrap(), vec![100]);

        let post = store.find_post(ids[0]).await.unwrap().unwrap();
        assert_eq!(post.source, "telegram");
        assert_eq!(post.user, "Threat Intel Digest");
        assert_eq!(post.url, "https://t.me/c/100/9");
        assert_eq!(post.content_txt, "Alert : new loader spotted");
    }
}
