//! IoC aggregation over search results.
//!
//! Runs the post search, then folds the linked indicators of the matching
//! posts into one entry per indicator, ranked by the best post score.

use std::collections::HashMap;

use serde::Serialize;

use super::engine::{SearchEngine, SearchOutcome};
use crate::error::Result;
use crate::types::IocType;

/// One aggregated indicator with the posts that mention it.
#[derive(Debug, Clone, Serialize)]
pub struct IocLink {
    pub value: String,
    #[serde(rename = "type")]
    pub ioc_type: IocType,
    pub subtype: Option<String>,
    pub comment: Option<String>,
    /// Best relevancy score over the linked posts
    pub relevance: u32,
    /// URLs of the posts mentioning this indicator
    pub links: Vec<String>,
}

/// Search posts, aggregate their IoCs. Returns the aggregation plus the
/// underlying search outcome (for headers, debug data, window echoes).
pub async fn search_iocs(
    engine: &SearchEngine,
    query: &str,
    cache_seconds: u64,
) -> Result<(Vec<IocLink>, SearchOutcome)> {
    let outcome = engine.search_posts(query, cache_seconds).await?;

    let mut scores: HashMap<i64, u32> = HashMap::new();
    let mut urls: HashMap<i64, &str> = HashMap::new();
    for hit in &outcome.hits {
        scores.insert(hit.post.id, hit.score.relevancy_score);
        urls.insert(hit.post.id, hit.post.url.as_str());
    }
    let post_ids: Vec<i64> = outcome.hits.iter().map(|hit| hit.post.id).collect();

    let mut links: Vec<IocLink> = Vec::new();
    for (ioc, linked_posts) in engine.store().iocs_with_posts(&post_ids).await? {
        let relevance = linked_posts
            .iter()
            .filter_map(|id| scores.get(id))
            .copied()
            .max()
            .unwrap_or(0);
        let mut post_urls: Vec<String> = linked_posts
            .iter()
            .filter_map(|id| urls.get(id))
            .map(|url| url.to_string())
            .collect();
        post_urls.dedup();
        links.push(IocLink {
            value: ioc.value,
            ioc_type: ioc.ioc_type,
            subtype: ioc.subtype,
            comment: ioc.comment,
            relevance,
            links: post_urls,
        });
    }

    links.sort_by(|a, b| b.relevance.cmp(&a.relevance));
    Ok((links, outcome))
}
