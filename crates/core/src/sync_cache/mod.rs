//! Identifier cache.
//!
//! Remembers when an entity was last reconciled so repeated runs skip the
//! network. Entries expire lazily: one older than the TTL reads as absent.

mod sqlite;
mod types;

pub use sqlite::SqliteSyncCache;
pub use types::*;

use chrono::{DateTime, Utc};

/// Storage for sync timestamps, shared by the one-shot engine and tooling.
pub trait SyncCache: Send + Sync {
    /// Digest of the entry, or `None` if it is unknown or expired.
    fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheError> {
        self.get_at(key, Utc::now())
    }

    /// Record a successful fetch now.
    fn put(&self, key: &CacheKey, digest: &str) -> Result<(), CacheError> {
        self.put_at(key, digest, Utc::now())
    }

    /// Like [`get`](Self::get) with an explicit clock.
    fn get_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<Option<String>, CacheError>;

    /// Like [`put`](Self::put) with an explicit clock.
    fn put_at(&self, key: &CacheKey, digest: &str, now: DateTime<Utc>) -> Result<(), CacheError>;

    /// Drop every entry.
    fn reset(&self) -> Result<u64, CacheError>;

    /// Entry counts.
    fn stats(&self) -> Result<CacheStats, CacheError>;
}
