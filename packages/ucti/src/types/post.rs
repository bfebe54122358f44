//! Posts captured from external sources.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single piece of external content.
///
/// Created once by a source adapter, then mutated only by the enricher:
/// stage flags, visibility, the materialized search document, and the
/// tag/IoC relations. Never deleted by normal operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,

    /// Short source tag: `mastodon`, `bluesky`, `telegram`, `rss:<name>`,
    /// `airtable`, `baserow`
    pub source: String,

    /// Opaque identifier from the origin; `(source, source_id)` is unique
    pub source_id: String,

    /// Authoring handle
    pub user: String,

    /// Canonical link to the original content
    pub url: String,

    /// Origin timestamp
    pub created_at: DateTime<Utc>,

    /// Local ingest timestamp
    pub fetched_at: DateTime<Utc>,

    /// Original markup
    pub content_html: String,

    /// Plain text derived from the markup
    pub content_txt: String,

    /// Materialized search document; populated once the post is visible
    pub content_search: Option<String>,

    /// Source record kept verbatim for audit
    pub raw: String,

    /// Hidden posts are excluded from every search path
    pub is_hidden: bool,

    /// Stage flags, one per enricher stage
    pub is_ingested: bool,
    pub tags_assigned: bool,
    pub iocs_assigned: bool,
}

impl Post {
    /// Number of whitespace-separated tokens in the plain text.
    pub fn token_count(&self) -> usize {
        self.content_txt.split_whitespace().count()
    }
}

/// Fields an adapter supplies when persisting a new post.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub source: String,
    pub source_id: String,
    pub user: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
    pub content_html: String,
    pub content_txt: String,
    pub raw: String,
}

impl NewPost {
    /// Posts with fewer than 3 tokens are never worth enriching; adapters
    /// mark them ingested at creation so the filter stage skips them.
    pub fn is_trivially_short(&self) -> bool {
        self.content_txt.split_whitespace().count() < 3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_post(content: &str) -> NewPost {
        NewPost {
            source: "mastodon".into(),
            source_id: "1".into(),
            user: "alice".into(),
            url: "https://example.com/1".into(),
            created_at: Utc::now(),
            content_html: content.into(),
            content_txt: content.into(),
            raw: "{}".into(),
        }
    }

    #[test]
    fn short_posts_are_detected() {
        assert!(new_post("too short").is_trivially_short());
        assert!(new_post("").is_trivially_short());
        assert!(!new_post("three whole tokens").is_trivially_short());
    }
}
