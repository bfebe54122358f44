//! The parse-ioc job: backfill indicators for visible posts that have none.
//!
//! Walks the corpus in id batches, resets the stage flag for posts without
//! any linked IoC (stage flags may be reset administratively), then lets the
//! regular extraction stage drain them.

use ucti::enrich::assign_iocs;
use ucti::error::Result;
use ucti::store::PostFilter;
use ucti::{Config, Store};

const BATCH_SIZE: i64 = 1000;

pub async fn run(store: &Store, config: &Config) -> Result<()> {
    let oracle = super::oracle_from_config(config)?;

    let mut cursor = 0i64;
    loop {
        let batch = store
            .find_posts(&PostFilter {
                is_hidden: Some(false),
                without_iocs: true,
                id_gt: Some(cursor),
                limit: Some(BATCH_SIZE),
                ..PostFilter::default()
            })
            .await?;
        let Some(last) = batch.last() else {
            break;
        };
        cursor = last.id;
        tracing::info!(count = batch.len(), cursor, "posts without IoCs fetched");

        let ids: Vec<i64> = batch.iter().map(|post| post.id).collect();
        for post in &batch {
            store.set_iocs_assigned(post.id, false).await?;
        }
        assign_iocs(store, &oracle, Some(ids)).await?;
    }
    Ok(())
}
