//! Stage 2: tag assignment.
//!
//! Literal hashtags are always kept; the oracle is only consulted for posts
//! long enough to say something (more than 15 tokens). Oracle proposals are
//! deduplicated and the 7 shortest survive, which biases towards the generic
//! tags that make search useful.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use super::{excerpt, refresh_search_document};
use crate::error::{ErrorBatch, FetchError, Result, UctiError};
use crate::oracle::Oracle;
use crate::store::{PostFilter, Store};
use crate::types::Post;

/// Only the head of the post feeds tagging.
const TAG_EXCERPT_CHARS: usize = 1000;
/// Posts at or below this many tokens keep only their literal hashtags.
const ORACLE_MIN_TOKENS: usize = 15;
/// Cap on oracle-proposed tags per post.
const ORACLE_TAG_LIMIT: usize = 7;

fn hashtag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"#\w+").unwrap())
}

/// Drain every visible post with `tags_assigned = false` (optionally
/// restricted to `ids`): collect tag names, upsert and link them, then
/// refresh the search document.
pub async fn assign_tags(store: &Store, oracle: &dyn Oracle, ids: Option<Vec<i64>>) -> Result<()> {
    let mut selection = PostFilter::untagged();
    if let Some(ids) = ids {
        if ids.is_empty() {
            return Ok(());
        }
        selection = selection.with_ids(ids);
    }
    let posts = store.find_posts(&selection).await?;
    tracing::info!(count = posts.len(), "posts to tag");

    let mut errors = ErrorBatch::new();
    for (index, post) in posts.iter().enumerate() {
        tracing::debug!(post = post.id, "tagging post {}/{}", index + 1, posts.len());
        if let Err(error) = tag_one(store, oracle, post).await {
            errors.push(UctiError::Fetch(FetchError::single(
                format!("error generating tags for post {}", post.id),
                error,
            )));
        }
    }
    errors.into_result("error generating tags")
}

async fn tag_one(store: &Store, oracle: &dyn Oracle, post: &Post) -> Result<()> {
    let content = excerpt(&post.content_txt, TAG_EXCERPT_CHARS);

    let mut names: BTreeSet<String> = hashtag_re()
        .find_iter(content)
        .map(|m| m.as_str().to_string())
        .collect();

    if content.split_whitespace().count() > ORACLE_MIN_TOKENS {
        let proposed: BTreeSet<String> = oracle.suggest_tags(content).await?.into_iter().collect();
        let mut shortest: Vec<String> = proposed.into_iter().collect();
        shortest.sort_by_key(|name| name.len());
        names.extend(shortest.into_iter().take(ORACLE_TAG_LIMIT));
    }

    let names: BTreeSet<String> = names.into_iter().map(|n| n.to_uppercase()).collect();
    tracing::debug!(post = post.id, ?names, "assigning tags");

    for name in &names {
        let tag = store.upsert_tag(name).await?;
        store.connect_tag(post.id, tag.id).await?;
    }
    store.set_tags_assigned(post.id, true).await?;
    refresh_search_document(store, post).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_post, MockOracle};

    #[tokio::test]
    async fn literal_hashtags_always_link() {
        let store = Store::in_memory().await.unwrap();
        let oracle = MockOracle::new();
        let post = store
            .create_post(&sample_post("mastodon", "1", "watch out for #ransomware today"), false)
            .await
            .unwrap();

        assign_tags(&store, &oracle, None).await.unwrap();

        let tags = store.tags_for_post(post.id).await.unwrap();
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, "#RANSOMWARE");

        let post = store.find_post(post.id).await.unwrap().unwrap();
        assert!(post.tags_assigned);
        // Tag assignment regenerates the search document with tag names.
        assert!(post.content_search.unwrap().contains("RANSOMWARE"));
    }

    #[tokio::test]
    async fn short_posts_never_ask_the_oracle() {
        let store = Store::in_memory().await.unwrap();
        let oracle = MockOracle::new().with_tags(&["#shouldNotAppear"]);
        store
            .create_post(&sample_post("mastodon", "1", "brief #infosec note"), false)
            .await
            .unwrap();

        assign_tags(&store, &oracle, None).await.unwrap();
        assert!(oracle.calls().is_empty());
    }

    #[tokio::test]
    async fn oracle_tags_keep_the_seven_shortest_uppercased() {
        let store = Store::in_memory().await.unwrap();
        let oracle = MockOracle::new().with_tags(&[
            "#zeroDay",
            "#malware",
            "#aVeryLongAndSpecificTagName",
            "#apt",
            "#phishing",
            "#infra",
            "#c2",
            "#edr",
            "#soc",
        ]);
        let post = store
            .create_post(
                &sample_post(
                    "mastodon",
                    "1",
                    "a longer report describing the campaign infrastructure, \
                     initial access vector and follow-on payloads in detail",
                ),
                false,
            )
            .await
            .unwrap();

        assign_tags(&store, &oracle, None).await.unwrap();

        let tags = store.tags_for_post(post.id).await.unwrap();
        let names: Vec<&str> = tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(tags.len(), 7);
        assert!(names.contains(&"#C2"));
        assert!(names.contains(&"#ZERODAY"));
        assert!(!names.iter().any(|n| n.contains("AVERYLONG")));
    }

    #[tokio::test]
    async fn stage_is_idempotent() {
        let store = Store::in_memory().await.unwrap();
        let oracle = MockOracle::new();
        let post = store
            .create_post(&sample_post("mastodon", "1", "#leak confirmed by vendor"), false)
            .await
            .unwrap();

        assign_tags(&store, &oracle, None).await.unwrap();
        assign_tags(&store, &oracle, None).await.unwrap();

        assert_eq!(store.tags_for_post(post.id).await.unwrap().len(), 1);
    }
}
