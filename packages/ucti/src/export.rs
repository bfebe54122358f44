//! Post snapshots: JSONL-gzip export and restore.
//!
//! The export keeps every post that search could ever surface (visible or
//! not yet ingested), batched by id cursor so memory stays flat regardless
//! of corpus size. Import is additive and respects `(source, source_id)`
//! uniqueness, so replaying a snapshot over a live store is safe.

use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::{PostFilter, Store};
use crate::types::{NewPost, Post};

const BATCH_SIZE: i64 = 1000;

/// One exported line.
#[derive(Debug, Serialize, Deserialize)]
pub struct PostSnapshot {
    #[serde(flatten)]
    pub post: Post,
    pub tags: Vec<String>,
}

/// Write `posts.jsonl.gz` into `backup_dir`. Returns the number of posts
/// written.
pub async fn export_posts(store: &Store, backup_dir: &Path) -> Result<usize> {
    let path = backup_dir.join("posts.jsonl.gz");
    let file = std::fs::File::create(&path)?;
    let mut encoder = GzEncoder::new(file, Compression::default());

    let mut cursor = 0i64;
    let mut written = 0usize;
    loop {
        // Hidden-but-uningested posts still matter: they may become visible
        // after a re-filter.
        let batch = store
            .find_posts(&PostFilter {
                id_gt: Some(cursor),
                limit: Some(BATCH_SIZE),
                ..PostFilter::default()
            })
            .await?;
        let Some(last) = batch.last() else {
            break;
        };
        cursor = last.id;

        for post in batch {
            if post.is_hidden && post.is_ingested {
                continue;
            }
            let tags = store
                .tags_for_post(post.id)
                .await?
                .into_iter()
                .map(|tag| tag.name)
                .collect();
            let line = serde_json::to_string(&PostSnapshot { post, tags })?;
            encoder.write_all(line.as_bytes())?;
            encoder.write_all(b"\n")?;
            written += 1;
        }
        tracing::debug!(cursor, written, "export batch done");
    }

    encoder.finish()?;
    tracing::info!(written, path = %path.display(), "backup saved");
    Ok(written)
}

/// Restore a snapshot: recreate missing posts (with their flags and search
/// documents) and relink their tags. Returns the number of posts created.
pub async fn import_posts(store: &Store, snapshot_path: &Path) -> Result<usize> {
    let file = std::fs::File::open(snapshot_path)?;
    let reader = BufReader::new(GzDecoder::new(file));

    let mut created = 0usize;
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let snapshot: PostSnapshot = serde_json::from_str(&line)?;
        let source = snapshot.post;

        if store
            .find_by_source_id(&source.source, &source.source_id)
            .await?
            .is_some()
        {
            continue;
        }

        let post = store
            .create_post(
                &NewPost {
                    source: source.source.clone(),
                    source_id: source.source_id.clone(),
                    user: source.user.clone(),
                    url: source.url.clone(),
                    created_at: source.created_at,
                    content_html: source.content_html.clone(),
                    content_txt: source.content_txt.clone(),
                    raw: source.raw.clone(),
                },
                source.is_ingested,
            )
            .await?;

        store.set_hidden(post.id, source.is_hidden).await?;
        store
            .set_tags_assigned(post.id, source.tags_assigned)
            .await?;
        store
            .set_iocs_assigned(post.id, source.iocs_assigned)
            .await?;
        if let Some(document) = &source.content_search {
            store.set_content_search(post.id, document).await?;
        }
        for name in &snapshot.tags {
            let tag = store.upsert_tag(name).await?;
            store.connect_tag(post.id, tag.id).await?;
        }
        created += 1;
    }

    tracing::info!(created, "snapshot imported");
    Ok(created)
}
