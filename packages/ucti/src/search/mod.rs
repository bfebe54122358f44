//! Ranked search over the post corpus.
//!
//! A query goes through four steps:
//!
//! 1. [`commands`] - inline `!commands` are scanned out and the canonical
//!    query (explicit date window) is produced
//! 2. [`parser`] - the remaining text parses into a tagged AST
//! 3. [`engine`] - stage 1 retrieves candidates through the FTS index over
//!    the hard window; stage 2 scores them with token-set similarity,
//!    penalties and AST adjustments, then applies the distinct filter
//! 4. [`cache`] - results are cached by the canonical query's SHA-256

pub mod cache;
pub mod commands;
pub mod engine;
pub mod iocs;
pub mod parser;
pub mod score;

pub use cache::SearchCache;
pub use commands::{
    canonical_query, canonical_windows, parse_search_commands, SearchCommands, DEFAULT_MIN_SCORE,
    RESULTS_MAX,
};
pub use engine::{SearchEngine, SearchOutcome, DEFAULT_CACHE_SECONDS};
pub use iocs::{search_iocs, IocLink};
pub use parser::{parse_query, Node};
pub use score::token_set_ratio;

use serde::{Deserialize, Serialize};

use crate::types::Post;

/// Scores attached to one search hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostScore {
    /// Token-set similarity after penalties and adjustments, 0..100-ish
    pub relevancy_score: u32,
    /// Highest similarity absorbed from dropped duplicates (distinct filter)
    pub distinct_score: u32,
}

/// One scored search result, self-contained enough to render and to cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub post: Post,
    pub tags: Vec<String>,
    pub score: PostScore,
}

/// Diagnostic payload exposed under `!debug`.
#[derive(Debug, Clone, Serialize)]
pub struct BackData {
    /// Number of full-text queries stage 1 issued
    pub cnt_search: u64,
    /// The fanned-out leaf search strings
    pub search_strings: Vec<String>,
}

/// Materialized search document for a post: plain text, tag names without
/// the `#`, selector tokens for source and user, and the origin timestamp.
pub fn search_document(post: &Post, tag_names: &[String]) -> String {
    let tags = tag_names
        .iter()
        .map(|name| name.trim_start_matches('#'))
        .collect::<Vec<_>>()
        .join(" ");
    [
        post.content_txt.as_str(),
        tags.as_str(),
        &format!("{}:{}", post.source, post.source),
        &format!("source:{}", post.source),
        &format!("user:{}", post.user),
        &post.created_at.to_rfc3339(),
    ]
    .join(" ")
}
