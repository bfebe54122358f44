//! Test doubles and fixtures.
//!
//! Useful for exercising the pipeline without network or LLM access.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{OracleError, Result};
use crate::oracle::Oracle;
use crate::types::{IocCandidate, NewPost};

/// A scripted oracle for tests: deterministic answers, call recording,
/// no network.
#[derive(Default)]
pub struct MockOracle {
    classification: Arc<RwLock<bool>>,
    tags: Arc<RwLock<Vec<String>>>,
    iocs: Arc<RwLock<Vec<IocCandidate>>>,
    fail_classification: Arc<RwLock<bool>>,
    calls: Arc<RwLock<Vec<OracleCall>>>,
}

/// Record of one call made to the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OracleCall {
    Classify { excerpt: String },
    SuggestTags { excerpt: String },
    ExtractIocs { excerpt: String },
}

impl MockOracle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every classification with `verdict`.
    pub fn with_classification(self, verdict: bool) -> Self {
        *self.classification.write().unwrap() = verdict;
        self
    }

    /// Propose these tags for every post.
    pub fn with_tags(self, tags: &[&str]) -> Self {
        *self.tags.write().unwrap() = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Propose these IoC candidates for every post.
    pub fn with_iocs(self, iocs: Vec<IocCandidate>) -> Self {
        *self.iocs.write().unwrap() = iocs;
        self
    }

    /// Make classification calls fail (for failure-accumulation tests).
    pub fn with_failing_classification(self) -> Self {
        *self.fail_classification.write().unwrap() = true;
        self
    }

    pub fn calls(&self) -> Vec<OracleCall> {
        self.calls.read().unwrap().clone()
    }

    pub fn classify_call_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, OracleCall::Classify { .. }))
            .count()
    }
}

#[async_trait]
impl Oracle for MockOracle {
    async fn is_cybersecurity(&self, text: &str) -> Result<bool> {
        self.calls.write().unwrap().push(OracleCall::Classify {
            excerpt: text.to_string(),
        });
        if *self.fail_classification.read().unwrap() {
            return Err(OracleError::Exhausted { attempts: 3 }.into());
        }
        Ok(*self.classification.read().unwrap())
    }

    async fn suggest_tags(&self, text: &str) -> Result<Vec<String>> {
        self.calls.write().unwrap().push(OracleCall::SuggestTags {
            excerpt: text.to_string(),
        });
        Ok(self.tags.read().unwrap().clone())
    }

    async fn extract_iocs(&self, text: &str) -> Result<Vec<IocCandidate>> {
        self.calls.write().unwrap().push(OracleCall::ExtractIocs {
            excerpt: text.to_string(),
        });
        Ok(self.iocs.read().unwrap().clone())
    }
}

/// Build an IoC candidate literal for tests.
pub fn candidate(value: &str, ioc_type: &str) -> IocCandidate {
    IocCandidate {
        value: value.to_string(),
        ioc_type: ioc_type.to_string(),
        comment: None,
    }
}

/// A minimal post fixture; `content_html` mirrors the text.
pub fn sample_post(source: &str, source_id: &str, content: &str) -> NewPost {
    NewPost {
        source: source.to_string(),
        source_id: source_id.to_string(),
        user: format!("poster@{source}"),
        url: format!("https://posts.example/{source}/{source_id}"),
        created_at: Utc::now(),
        content_html: content.to_string(),
        content_txt: content.to_string(),
        raw: "{}".to_string(),
    }
}
