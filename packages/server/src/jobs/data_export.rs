//! The data-export job: JSONL-gzip snapshot of the corpus.

use ucti::error::Result;
use ucti::export::export_posts;
use ucti::{Dirs, Store};

pub async fn run(store: &Store, dirs: &Dirs) -> Result<()> {
    let written = export_posts(store, &dirs.backup).await?;
    tracing::info!(written, "posts exported");
    Ok(())
}
