//! OpenAI-compatible chat client with structured output and retries.
//!
//! Both supported providers speak the `chat/completions` wire format with
//! `response_format: json_schema`; `mistral` only fixes the base URL.

use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::prompts;
use super::{prompt_excerpt, Oracle, CLASSIFY_INPUT_LIMIT, IOC_INPUT_LIMIT, TAG_INPUT_LIMIT};
use crate::config::{AiConfig, AiProvider};
use crate::error::{OracleError, Result, UctiError};
use crate::types::IocCandidate;

const MISTRAL_BASE_URL: &str = "https://api.mistral.ai/v1";

/// Backoff after the model returned output violating the schema.
const SCHEMA_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Backoff after HTTP 429 or 500 from the provider.
const HTTP_RETRY_DELAY: Duration = Duration::from_secs(5);

/// LLM-backed [`Oracle`] implementation.
pub struct LlmOracle {
    client: Client,
    model: String,
    api_keys: Vec<String>,
    base_url: String,
    retries: u32,
}

impl LlmOracle {
    pub fn from_config(config: &AiConfig) -> Result<Self> {
        let base_url = match config.provider {
            AiProvider::Mistral => MISTRAL_BASE_URL.to_string(),
            AiProvider::OpenaiCompatible => config
                .base_url
                .clone()
                .ok_or_else(|| UctiError::Config("[ai] base_url is required for openai-compatible".into()))?,
        };
        let api_keys = config.api_key.as_slice().to_vec();
        if api_keys.is_empty() {
            return Err(UctiError::Config("[ai] api_key is empty".into()));
        }
        Ok(Self {
            client: Client::new(),
            model: config.model.clone(),
            api_keys,
            base_url,
            retries: config.retries,
        })
    }

    /// Each call independently picks one of the configured keys.
    fn pick_api_key(&self) -> &str {
        self.api_keys
            .choose(&mut rand::thread_rng())
            .expect("at least one api key")
    }

    /// One structured-output exchange: ask the model, demand output matching
    /// `schema`, retry on rate limits, server errors and schema violations
    /// within the attempt budget. Other HTTP errors surface immediately.
    pub async fn ask(&self, system: &str, user: &str, schema: Value) -> Result<Value> {
        for _ in 0..self.retries {
            match self.ask_once(system, user, schema.clone()).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => {
                    let delay = match &err {
                        OracleError::SchemaViolation(reason) => {
                            tracing::warn!("unexpected model output: {reason}, retrying");
                            SCHEMA_RETRY_DELAY
                        }
                        OracleError::RateLimited => {
                            tracing::warn!("rate limited by provider, retrying");
                            HTTP_RETRY_DELAY
                        }
                        _ => {
                            tracing::warn!("provider server error, retrying");
                            HTTP_RETRY_DELAY
                        }
                    };
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(OracleError::Exhausted {
            attempts: self.retries,
        }
        .into())
    }

    async fn ask_once(
        &self,
        system: &str,
        user: &str,
        schema: Value,
    ) -> std::result::Result<Value, OracleError> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: user.to_string(),
                },
            ],
            temperature: 0.0,
            response_format: ResponseFormat {
                format_type: "json_schema",
                json_schema: JsonSchemaFormat {
                    name: "oracle_response",
                    strict: true,
                    schema,
                },
            },
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .header("Authorization", format!("Bearer {}", self.pick_api_key()))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(match status.as_u16() {
                429 => OracleError::RateLimited,
                500 => OracleError::ServerError,
                code => OracleError::Http {
                    status: code,
                    body: response.text().await.unwrap_or_default(),
                },
            });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| OracleError::SchemaViolation(e.to_string()))?;
        let content = chat
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| OracleError::SchemaViolation("empty choices".into()))?;

        let parsed: Value = serde_json::from_str(&content)
            .map_err(|e| OracleError::SchemaViolation(format!("not JSON: {e}")))?;
        parsed
            .get("result")
            .cloned()
            .ok_or_else(|| OracleError::SchemaViolation("missing result field".into()))
    }
}

#[async_trait]
impl Oracle for LlmOracle {
    async fn is_cybersecurity(&self, text: &str) -> Result<bool> {
        let user = format!(
            "Is this post written in English and about cybersecurity? Answer true or false: {}",
            prompt_excerpt(text, CLASSIFY_INPUT_LIMIT)
        );
        let value = self
            .ask(prompts::CLASSIFY_SYSTEM, &user, prompts::bool_schema())
            .await?;
        serde_json::from_value(value)
            .map_err(|e| OracleError::SchemaViolation(e.to_string()).into())
    }

    async fn suggest_tags(&self, text: &str) -> Result<Vec<String>> {
        let user = format!(
            "Please suggest what hashtags I should use for this post: {}",
            prompt_excerpt(text, TAG_INPUT_LIMIT)
        );
        let value = self
            .ask(prompts::TAGS_SYSTEM, &user, prompts::tags_schema())
            .await?;
        let tags: Vec<String> = serde_json::from_value(value)
            .map_err(|e| OracleError::SchemaViolation(e.to_string()))?;
        Ok(tags.into_iter().filter(|t| t.starts_with('#')).collect())
    }

    async fn extract_iocs(&self, text: &str) -> Result<Vec<IocCandidate>> {
        let user = format!(
            "Extract all indicators of compromise from this post: {}",
            prompt_excerpt(text, IOC_INPUT_LIMIT)
        );
        let value = self
            .ask(prompts::IOCS_SYSTEM, &user, prompts::iocs_schema())
            .await?;
        serde_json::from_value(value)
            .map_err(|e| OracleError::SchemaViolation(e.to_string()).into())
    }
}

// Wire types

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
    json_schema: JsonSchemaFormat,
}

#[derive(Serialize)]
struct JsonSchemaFormat {
    name: &'static str,
    strict: bool,
    schema: Value,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ApiKeys;

    fn config(provider: AiProvider, base_url: Option<&str>) -> AiConfig {
        AiConfig {
            provider,
            model: "test-model".into(),
            api_key: ApiKeys::Many(vec!["k1".into(), "k2".into()]),
            base_url: base_url.map(String::from),
            retries: 3,
        }
    }

    #[test]
    fn mistral_provider_fixes_base_url() {
        let oracle = LlmOracle::from_config(&config(AiProvider::Mistral, None)).unwrap();
        assert_eq!(oracle.base_url, MISTRAL_BASE_URL);
    }

    #[test]
    fn openai_compatible_requires_base_url() {
        assert!(LlmOracle::from_config(&config(AiProvider::OpenaiCompatible, None)).is_err());
        let oracle = LlmOracle::from_config(&config(
            AiProvider::OpenaiCompatible,
            Some("https://llm.internal/v1"),
        ))
        .unwrap();
        assert_eq!(oracle.base_url, "https://llm.internal/v1");
    }

    #[test]
    fn api_key_rotation_stays_within_configured_keys() {
        let oracle = LlmOracle::from_config(&config(AiProvider::Mistral, None)).unwrap();
        for _ in 0..16 {
            assert!(["k1", "k2"].contains(&oracle.pick_api_key()));
        }
    }
}
