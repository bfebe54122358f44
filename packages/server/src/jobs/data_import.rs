//! The data-import job: restore posts from a snapshot.

use std::path::PathBuf;

use ucti::error::Result;
use ucti::export::import_posts;
use ucti::{Dirs, Store};

pub async fn run(store: &Store, dirs: &Dirs, file: Option<PathBuf>) -> Result<()> {
    let path = file.unwrap_or_else(|| dirs.backup.join("posts.jsonl.gz"));
    let created = import_posts(store, &path).await?;
    tracing::info!(created, path = %path.display(), "posts imported");
    Ok(())
}
