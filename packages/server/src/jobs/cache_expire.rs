//! The cache-expire job: drop search-cache rows past their expiry, along
//! with their payload files.

use ucti::error::Result;
use ucti::search::SearchCache;
use ucti::{Dirs, Store};

pub async fn run(store: &Store, dirs: &Dirs) -> Result<()> {
    let cache = SearchCache::new(&dirs.cache);
    let expired = cache.expire(store).await?;
    tracing::info!(expired, "cache entries expired");
    Ok(())
}
