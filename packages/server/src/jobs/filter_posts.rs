//! The filter-posts job: oracle-only re-classification of the visible
//! corpus, used after prompt or model changes.

use ucti::enrich::refilter_visible;
use ucti::error::Result;
use ucti::{Config, Store};

pub async fn run(store: &Store, config: &Config) -> Result<()> {
    let oracle = super::oracle_from_config(config)?;
    refilter_visible(store, &oracle).await
}
