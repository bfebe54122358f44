//! Domain types persisted by the store.

pub mod ioc;
pub mod post;
pub mod tag;

pub use ioc::{Ioc, IocCandidate, IocType};
pub use post::{NewPost, Post};
pub use tag::Tag;

use chrono::{DateTime, Utc};

/// Row describing one cached search result payload.
#[derive(Debug, Clone)]
pub struct SearchCacheEntry {
    pub id: i64,
    /// SHA-256 of the canonical query
    pub query_hash: String,
    pub query: String,
    pub expires_at: DateTime<Utc>,
    /// File name of the payload, relative to the cache directory
    pub filepath: String,
}
