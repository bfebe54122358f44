//! Typed configuration loaded from `config.toml`.
//!
//! Every section is optional; a missing section disables the adapter or
//! feature that needs it. Jobs that require a section which is absent fail
//! with [`UctiError::MissingConfig`].

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, UctiError};

/// Root configuration document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    pub ai: Option<AiConfig>,
    pub mastodon: Option<MastodonConfig>,
    pub airtable: Option<AirtableConfig>,
    pub baserow: Option<BaserowConfig>,
    pub bluesky: Option<BlueskyConfig>,
    pub telegram: Option<TelegramConfig>,
    /// Feed name -> feed definition
    #[serde(default)]
    pub rss: BTreeMap<String, RssFeedConfig>,
    #[serde(rename = "misp-org")]
    pub misp_org: Option<MispOrgConfig>,
}

impl Config {
    /// Load and parse the configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| UctiError::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&raw).map_err(|e| UctiError::Config(e.to_string()))
    }

    /// The `[ai]` section, or a missing-config error.
    pub fn ai(&self) -> Result<&AiConfig> {
        self.ai.as_ref().ok_or(UctiError::MissingConfig("ai"))
    }

    /// The `[misp-org]` section, or a missing-config error.
    pub fn misp_org(&self) -> Result<&MispOrgConfig> {
        self.misp_org
            .as_ref()
            .ok_or(UctiError::MissingConfig("misp-org"))
    }
}

/// LLM provider selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AiProvider {
    Mistral,
    OpenaiCompatible,
}

/// One or many API keys; a key is chosen at random per call.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ApiKeys {
    One(String),
    Many(Vec<String>),
}

impl ApiKeys {
    pub fn as_slice(&self) -> &[String] {
        match self {
            Self::One(key) => std::slice::from_ref(key),
            Self::Many(keys) => keys,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AiConfig {
    pub provider: AiProvider,
    pub model: String,
    pub api_key: ApiKeys,
    /// Required for `openai-compatible`, ignored for `mistral`
    pub base_url: Option<String>,
    /// Retry attempts per oracle call
    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct MastodonConfig {
    pub client_id: String,
    pub client_secret: String,
    pub access_token: String,
    pub api_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AirtableConfig {
    pub api_key: String,
    pub base_id: String,
    pub table_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BaserowConfig {
    pub base_url: String,
    pub api_key: String,
    pub table_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BlueskyConfig {
    pub handle: String,
    pub app_password: String,
    #[serde(default)]
    pub feeds: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TelegramConfig {
    pub api_id: i64,
    pub api_hash: String,
    #[serde(default)]
    pub chats: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RssFeedConfig {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MispOrgConfig {
    pub name: String,
    pub uuid: String,
    pub email: String,
}
