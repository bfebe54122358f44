//! Post enrichment: a staged, idempotent transformer.
//!
//! Three stages, each draining a selection predicate and setting a per-post
//! completion flag:
//!
//! 1. **filter** - cybersecurity visibility (`is_ingested`)
//! 2. **tags** - hashtag assignment (`tags_assigned`)
//! 3. **iocs** - indicator extraction (`iocs_assigned`)
//!
//! Rerunning a stage is a no-op selection once the flag is set. Within one
//! ingest run of a source the stages execute in order; across posts no
//! ordering is required. Per-post failures are accumulated and reported as a
//! compound error after the stage finishes the remaining posts.

pub mod filter;
pub mod iocs;
pub mod tags;

pub use filter::{filter_posts, is_cybersecurity_by_keywords, refilter_visible};
pub use iocs::{assign_iocs, validate_candidate, ValidIoc};
pub use tags::assign_tags;

use crate::error::Result;
use crate::search::search_document;
use crate::store::Store;
use crate::types::Post;

/// Rebuild the post's materialized search document from its current text
/// and tags. Called whenever a stage changes what search should see.
pub async fn refresh_search_document(store: &Store, post: &Post) -> Result<()> {
    let tags = store.tags_for_post(post.id).await?;
    let names: Vec<String> = tags.into_iter().map(|t| t.name).collect();
    let document = search_document(post, &names);
    store.set_content_search(post.id, &document).await
}

/// Char-boundary-safe excerpt of the post text for an oracle prompt.
pub(crate) fn excerpt(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_respects_char_boundaries() {
        assert_eq!(excerpt("abcdef", 3), "abc");
        assert_eq!(excerpt("šíření malwaru", 6), "šířen");
        assert_eq!(excerpt("short", 100), "short");
    }
}
