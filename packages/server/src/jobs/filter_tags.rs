//! The filter-tags job: tag hygiene.
//!
//! Three passes over the tag table:
//!
//! 1. delete tags whose names break the invariant (`#` + alphanumerics,
//!    length 5..50 inclusive)
//! 2. merge equivalent tags (one name prefixing the other, or Levenshtein
//!    similarity above 90) by re-parenting posts onto the survivor
//! 3. delete tags used by fewer than 2 posts
//!
//! The merge pass is a pairwise comparison over all tags. That is quadratic
//! and fine at tens of thousands of tags; the job is daily and offline.

use std::collections::{HashMap, HashSet};

use ucti::error::Result;
use ucti::types::Tag;
use ucti::Store;

const PAGE_SIZE: i64 = 10_000;
/// Similarity above this merges two tags.
const MERGE_RATIO: f64 = 0.90;
const NAME_MIN: usize = 5;
const NAME_MAX: usize = 50;

pub async fn run(store: &Store) -> Result<()> {
    tracing::info!("loading tags");
    let tags = load_all_tags(store).await?;
    tracing::info!(count = tags.len(), "tags loaded");

    delete_malformed(store, &tags).await?;

    let tags = load_all_tags(store).await?;
    merge_equivalent(store, &tags).await?;

    prune_unused(store).await?;
    tracing::info!("tags processed");
    Ok(())
}

async fn load_all_tags(store: &Store) -> Result<Vec<Tag>> {
    let mut tags = Vec::new();
    let mut cursor = 0i64;
    loop {
        let page = store.tags_after(cursor, PAGE_SIZE).await?;
        let Some(last) = page.last() else {
            break;
        };
        cursor = last.id;
        tags.extend(page);
    }
    Ok(tags)
}

fn name_is_valid(name: &str) -> bool {
    let Some(rest) = name.strip_prefix('#') else {
        return false;
    };
    (NAME_MIN..=NAME_MAX).contains(&name.len())
        && !rest.is_empty()
        && rest.chars().all(|c| c.is_ascii_alphanumeric())
}

async fn delete_malformed(store: &Store, tags: &[Tag]) -> Result<()> {
    let mut deleted = 0usize;
    for tag in tags {
        if !name_is_valid(&tag.name) {
            tracing::info!(tag = %tag.name, "deleting malformed tag");
            store.delete_tag(tag.id).await?;
            deleted += 1;
        }
    }
    tracing::info!(deleted, "malformed tags deleted");
    Ok(())
}

async fn merge_equivalent(store: &Store, tags: &[Tag]) -> Result<()> {
    // main tag id -> the ids folding into it
    let mut combine: HashMap<i64, HashSet<i64>> = HashMap::new();
    let mut taken: HashSet<i64> = HashSet::new();

    for (i, tag) in tags.iter().enumerate() {
        if taken.contains(&tag.id) {
            continue;
        }
        let name = tag.name.to_lowercase();
        for other in &tags[i + 1..] {
            if taken.contains(&other.id) {
                continue;
            }
            let other_name = other.name.to_lowercase();
            if other_name.starts_with(&name) {
                combine.entry(tag.id).or_default().insert(other.id);
                taken.insert(other.id);
            } else if name.starts_with(&other_name)
                || strsim::normalized_levenshtein(&name, &other_name) > MERGE_RATIO
            {
                combine.entry(tag.id).or_default().insert(other.id);
                taken.insert(other.id);
            }
        }
    }

    let mut merged = 0usize;
    for (main_id, sub_ids) in combine {
        for sub_id in sub_ids {
            tracing::info!(from = sub_id, into = main_id, "merging tag");
            store.reparent_tag(sub_id, main_id).await?;
            merged += 1;
        }
    }
    tracing::info!(merged, "equivalent tags merged");
    Ok(())
}

async fn prune_unused(store: &Store) -> Result<()> {
    let tags = load_all_tags(store).await?;
    let mut pruned = 0usize;
    for tag in tags {
        if store.post_count_for_tag(tag.id).await? < 2 {
            tracing::info!(tag = %tag.name, "deleting unused tag");
            store.delete_tag(tag.id).await?;
            pruned += 1;
        }
    }
    tracing::info!(pruned, "unused tags pruned");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ucti::testing::sample_post;

    #[test]
    fn name_invariant() {
        assert!(name_is_valid("#MALWARE"));
        assert!(name_is_valid("#CVE42"));
        assert!(!name_is_valid("MALWARE"));
        assert!(!name_is_valid("#AB"));
        assert!(!name_is_valid("#WITH SPACE"));
        assert!(!name_is_valid(&format!("#{}", "X".repeat(60))));
    }

    async fn tag_posts(store: &Store, tag_name: &str, count: usize) {
        let tag = store.upsert_tag(tag_name).await.unwrap();
        for i in 0..count {
            let post = store
                .create_post(
                    &sample_post("mastodon", &format!("{tag_name}-{i}"), "post body for tagging"),
                    false,
                )
                .await
                .unwrap();
            store.connect_tag(post.id, tag.id).await.unwrap();
        }
    }

    #[tokio::test]
    async fn malformed_and_unused_tags_are_deleted() {
        let store = Store::in_memory().await.unwrap();
        tag_posts(&store, "#SOLO", 1).await; // too few posts
        tag_posts(&store, "#KEPT", 2).await;
        tag_posts(&store, "#BAD!", 2).await; // malformed name

        run(&store).await.unwrap();

        let remaining = store.tags_after(0, 100).await.unwrap();
        let names: Vec<&str> = remaining.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["#KEPT"]);
    }

    #[tokio::test]
    async fn prefix_equivalent_tags_merge() {
        let store = Store::in_memory().await.unwrap();
        tag_posts(&store, "#RANSOM", 2).await;
        tag_posts(&store, "#RANSOMWARE", 2).await;

        run(&store).await.unwrap();

        let remaining = store.tags_after(0, 100).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].name, "#RANSOM");
        // The survivor now carries all four posts.
        assert_eq!(store.post_count_for_tag(remaining[0].id).await.unwrap(), 4);
    }
}
