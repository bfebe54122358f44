//! Stage 1: cybersecurity visibility filter.
//!
//! Cheap keyword whitelist first; only posts the whitelist cannot decide go
//! to the oracle. The `filter-posts` job re-runs this stage in force-AI mode
//! over historical data, skipping the shortcut.

use std::sync::OnceLock;

use regex::Regex;

use super::refresh_search_document;
use crate::error::{ErrorBatch, FetchError, Result, UctiError};
use crate::oracle::Oracle;
use crate::store::{PostFilter, Store};
use crate::types::Post;

/// Substrings that mark a post as cybersecurity without asking the oracle.
const KEYWORD_WHITELIST: [&str; 14] = [
    "infosec",
    "cybersec",
    "vuln",
    "hack",
    "exploit",
    "deepfake",
    "threat",
    "leak",
    "phishing",
    "bypass",
    "outage",
    "steal",
    "malicious",
    "compromise",
];

fn handle_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"@\S+").unwrap())
}

/// Keyword shortcut: lowercase the text, strip `@handles`, then look for any
/// whitelisted substring.
pub fn is_cybersecurity_by_keywords(content: &str) -> bool {
    let content = content.to_lowercase();
    let content = handle_re().replace_all(&content, "");
    KEYWORD_WHITELIST
        .iter()
        .any(|keyword| content.contains(keyword))
}

/// Decide visibility for one post and persist a flip when it changes.
/// Returns whether the post is visible.
pub async fn hide_if_not_cybersecurity(
    store: &Store,
    oracle: &dyn Oracle,
    post: &Post,
    force_ai: bool,
) -> Result<bool> {
    let visible = if !force_ai && is_cybersecurity_by_keywords(&post.content_txt) {
        true
    } else {
        oracle.is_cybersecurity(&post.content_txt).await?
    };
    if visible == post.is_hidden {
        store.set_hidden(post.id, !visible).await?;
    }
    Ok(visible)
}

/// Drain every post with `is_ingested = false` (optionally restricted to
/// `ids`): decide visibility, materialize the search document for visible
/// posts, and mark the stage done.
pub async fn filter_posts(
    store: &Store,
    oracle: &dyn Oracle,
    ids: Option<Vec<i64>>,
    force_ai: bool,
) -> Result<()> {
    let mut selection = PostFilter::uningested();
    if let Some(ids) = ids {
        if ids.is_empty() {
            return Ok(());
        }
        selection = selection.with_ids(ids);
    }
    let posts = store.find_posts(&selection).await?;
    tracing::info!(count = posts.len(), "posts to filter");

    let mut errors = ErrorBatch::new();
    for (index, post) in posts.iter().enumerate() {
        tracing::debug!(post = post.id, "filtering post {}/{}", index + 1, posts.len());
        match filter_one(store, oracle, post, force_ai).await {
            Ok(visible) => {
                tracing::debug!(post = post.id, visible, "post filtered");
            }
            Err(error) => errors.push(UctiError::Fetch(FetchError::single(
                format!("error ingesting post {}", post.id),
                error,
            ))),
        }
    }
    errors.into_result("error ingesting posts")
}

async fn filter_one(
    store: &Store,
    oracle: &dyn Oracle,
    post: &Post,
    force_ai: bool,
) -> Result<bool> {
    let visible = hide_if_not_cybersecurity(store, oracle, post, force_ai).await?;
    if visible {
        refresh_search_document(store, post).await?;
    }
    store.set_ingested(post.id, true).await?;
    Ok(visible)
}

/// Re-classify every currently visible post with the oracle, skipping the
/// keyword shortcut. Used by the `filter-posts` job over historical data.
/// Posts that lose visibility also lose their tag assignment.
pub async fn refilter_visible(store: &Store, oracle: &dyn Oracle) -> Result<()> {
    let posts = store
        .find_posts(&PostFilter {
            is_hidden: Some(false),
            ..PostFilter::default()
        })
        .await?;
    tracing::info!(count = posts.len(), "visible posts to re-classify");

    let mut errors = ErrorBatch::new();
    for post in &posts {
        let outcome = match hide_if_not_cybersecurity(store, oracle, post, true).await {
            Ok(true) => {
                tracing::debug!(post = post.id, "kept");
                Ok(())
            }
            Ok(false) => {
                tracing::info!(post = post.id, "hidden");
                retract_tags(store, post.id).await
            }
            Err(error) => Err(error),
        };
        if let Err(error) = outcome {
            errors.push(UctiError::Fetch(FetchError::single(
                format!("error re-classifying post {}", post.id),
                error,
            )));
        }
    }
    errors.into_result("error re-classifying posts")
}

/// Retract a hidden post's tag relations. Each relation is removed on its
/// own (the tags survive for their other posts) and the stage flag is
/// cleared, so a post that becomes visible again is tagged afresh.
async fn retract_tags(store: &Store, post_id: i64) -> Result<()> {
    for tag in store.tags_for_post(post_id).await? {
        store.disconnect_tag(post_id, tag.id).await?;
    }
    store.set_tags_assigned(post_id, false).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_post, MockOracle};

    #[test]
    fn keywords_match_case_insensitively() {
        assert!(is_cybersecurity_by_keywords("Massive PHISHING wave today"));
        assert!(is_cybersecurity_by_keywords("new vulnerability in foo"));
        assert!(!is_cybersecurity_by_keywords("great pasta recipe"));
    }

    #[test]
    fn handles_are_stripped_before_matching() {
        // The keyword only appears inside a handle, so it must not count.
        assert!(!is_cybersecurity_by_keywords("shoutout to @hacker_joe for the cake"));
    }

    #[tokio::test]
    async fn whitelisted_post_skips_the_oracle() {
        let store = Store::in_memory().await.unwrap();
        let oracle = MockOracle::new().with_classification(false);
        let post = store
            .create_post(&sample_post("rss:x", "1", "independent infosec reporting here"), false)
            .await
            .unwrap();

        filter_posts(&store, &oracle, None, false).await.unwrap();

        let post = store.find_post(post.id).await.unwrap().unwrap();
        assert!(!post.is_hidden);
        assert!(post.is_ingested);
        assert!(post.content_search.is_some());
        assert_eq!(oracle.classify_call_count(), 0);
    }

    #[tokio::test]
    async fn oracle_rejection_hides_the_post() {
        let store = Store::in_memory().await.unwrap();
        let oracle = MockOracle::new().with_classification(false);
        let post = store
            .create_post(&sample_post("rss:x", "1", "my favourite sourdough recipe collection"), false)
            .await
            .unwrap();

        filter_posts(&store, &oracle, None, false).await.unwrap();

        let post = store.find_post(post.id).await.unwrap().unwrap();
        assert!(post.is_hidden);
        assert!(post.is_ingested);
        assert!(post.content_search.is_none());
        assert_eq!(oracle.classify_call_count(), 1);
    }

    #[tokio::test]
    async fn force_ai_ignores_the_keyword_shortcut() {
        let store = Store::in_memory().await.unwrap();
        let oracle = MockOracle::new().with_classification(false);
        let post = store
            .create_post(
                &sample_post("rss:x", "1", "does mention infosec but is spam really"),
                false,
            )
            .await
            .unwrap();

        filter_posts(&store, &oracle, None, true).await.unwrap();

        let post = store.find_post(post.id).await.unwrap().unwrap();
        assert!(post.is_hidden);
        assert_eq!(oracle.classify_call_count(), 1);
    }

    #[tokio::test]
    async fn failures_accumulate_and_other_posts_proceed() {
        let store = Store::in_memory().await.unwrap();
        let oracle = MockOracle::new().with_failing_classification();
        store
            .create_post(&sample_post("rss:x", "1", "something unclassifiable entirely"), false)
            .await
            .unwrap();
        let keyword_post = store
            .create_post(&sample_post("rss:x", "2", "exploit drop for popular firewall"), false)
            .await
            .unwrap();

        let err = filter_posts(&store, &oracle, None, false)
            .await
            .unwrap_err();
        match err {
            UctiError::Fetch(fetch) => assert_eq!(fetch.flatten().len(), 1),
            other => panic!("expected compound error, got {other}"),
        }

        // The keyword-whitelisted post was still processed.
        let post = store.find_post(keyword_post.id).await.unwrap().unwrap();
        assert!(post.is_ingested);
        assert!(!post.is_hidden);
    }

    #[tokio::test]
    async fn refilter_retracts_tags_from_hidden_posts() {
        let store = Store::in_memory().await.unwrap();
        let oracle = MockOracle::new().with_classification(false);

        let spam = store
            .create_post(&sample_post("rss:x", "s", "totally unrelated lifestyle content"), false)
            .await
            .unwrap();
        let intel = store
            .create_post(&sample_post("rss:x", "i", "fresh malware loader analysis"), false)
            .await
            .unwrap();
        store.set_hidden(intel.id, true).await.unwrap();
        let tag = store.upsert_tag("#LOADER").await.unwrap();
        store.connect_tag(spam.id, tag.id).await.unwrap();
        store.connect_tag(intel.id, tag.id).await.unwrap();
        store.set_tags_assigned(spam.id, true).await.unwrap();

        refilter_visible(&store, &oracle).await.unwrap();

        let spam = store.find_post(spam.id).await.unwrap().unwrap();
        assert!(spam.is_hidden);
        assert!(!spam.tags_assigned);
        assert!(store.tags_for_post(spam.id).await.unwrap().is_empty());
        // The tag survives through its other post.
        assert_eq!(store.post_count_for_tag(tag.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn rerunning_the_stage_is_a_no_op() {
        let store = Store::in_memory().await.unwrap();
        let oracle = MockOracle::new().with_classification(true);
        store
            .create_post(&sample_post("rss:x", "1", "completely harmless gardening update"), false)
            .await
            .unwrap();

        filter_posts(&store, &oracle, None, false).await.unwrap();
        assert_eq!(oracle.classify_call_count(), 1);
        filter_posts(&store, &oracle, None, false).await.unwrap();
        assert_eq!(oracle.classify_call_count(), 1);
    }
}
