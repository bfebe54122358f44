//! LLM oracle: natural-language classification, tag proposal, and IoC
//! extraction.
//!
//! The oracle is nondeterministic and stateless; there is no caching here.
//! Retry handling for flaky providers lives in the client, bounded by the
//! configured attempt budget.

mod client;
mod prompts;

pub use client::LlmOracle;

use async_trait::async_trait;

use crate::error::Result;
use crate::types::IocCandidate;

/// The three questions the enrichment pipeline asks of a language model.
///
/// Implementations wrap a specific provider and own prompting, output
/// parsing, and retries. Callers pass already-truncated text; the trait
/// methods apply the per-operation caps once more as a guard.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Is this post written in English and about cybersecurity?
    async fn is_cybersecurity(&self, text: &str) -> Result<bool>;

    /// Up to 7 cybersecurity hashtags for the post (camelCase, `#`-prefixed).
    async fn suggest_tags(&self, text: &str) -> Result<Vec<String>>;

    /// Typed indicators of compromise found in the post.
    async fn extract_iocs(&self, text: &str) -> Result<Vec<IocCandidate>>;
}

/// Per-operation prompt caps, in characters.
pub const CLASSIFY_INPUT_LIMIT: usize = 500;
pub const TAG_INPUT_LIMIT: usize = 400;
pub const IOC_INPUT_LIMIT: usize = 2000;

/// Truncate to at most `limit` characters, respecting char boundaries, and
/// collapse newlines so the text reads as one line inside the prompt.
pub fn prompt_excerpt(text: &str, limit: usize) -> String {
    text.chars()
        .take(limit)
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_truncates_on_char_boundaries() {
        let text = "ważne ostrzeżenie o złośliwym oprogramowaniu";
        let excerpt = prompt_excerpt(text, 10);
        assert_eq!(excerpt.chars().count(), 10);
    }

    #[test]
    fn excerpt_flattens_newlines() {
        assert_eq!(prompt_excerpt("a\nb\nc", 100), "a b c");
    }
}
