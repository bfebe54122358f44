//! The tag job: filter and tag the whole backlog, regardless of source.

use ucti::enrich::{assign_tags, filter_posts};
use ucti::error::{ErrorBatch, Result};
use ucti::{Config, Store};

pub async fn run(store: &Store, config: &Config) -> Result<()> {
    let oracle = super::oracle_from_config(config)?;

    tracing::info!("ingesting all unprocessed posts");
    let mut errors = ErrorBatch::new();
    if let Err(error) = filter_posts(store, &oracle, None, false).await {
        errors.push(error);
    }
    tracing::info!("generating tags for all untagged posts");
    if let Err(error) = assign_tags(store, &oracle, None).await {
        errors.push(error);
    }
    errors.into_result("error tagging backlog")
}
