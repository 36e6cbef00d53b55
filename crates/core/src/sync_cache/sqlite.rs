//! SQLite-backed identifier cache.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use super::{CacheConfig, CacheError, CacheKey, CacheStats, SyncCache};
use crate::permissions::PermissionPolicy;

/// SQLite-backed identifier cache.
///
/// Each row records the TTL that was in force when it was written, but
/// freshness is always judged against the TTL this cache was opened with.
pub struct SqliteSyncCache {
    conn: Mutex<Connection>,
    ttl: Duration,
}

impl SqliteSyncCache {
    /// Open (or create) the cache file.
    pub fn new(path: &Path, ttl_secs: u64) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn, ttl_secs)
    }

    /// Open the configured cache, creating its directory under `policy`.
    pub fn open(config: &CacheConfig, policy: &PermissionPolicy) -> Result<Self, CacheError> {
        if let Some(parent) = config.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                policy
                    .create_dir_all(parent)
                    .map_err(|e| CacheError::Location(e.to_string()))?;
            }
        }
        info!(path = %config.path.display(), ttl_secs = config.ttl_secs, "Opening sync cache");
        Self::new(&config.path, config.ttl_secs)
    }

    /// Create an in-memory cache (useful for testing).
    pub fn in_memory(ttl_secs: u64) -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn, ttl_secs)
    }

    fn with_connection(conn: Connection, ttl_secs: u64) -> Result<Self, CacheError> {
        Self::initialize_schema(&conn)?;
        let ttl_secs = i64::try_from(ttl_secs)
            .map_err(|_| CacheError::Database(format!("ttl {} out of range", ttl_secs)))?;
        Ok(Self {
            conn: Mutex::new(conn),
            ttl: Duration::seconds(ttl_secs),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), CacheError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sync_cache (
                provider TEXT NOT NULL,
                key TEXT NOT NULL,
                fetched_at TEXT NOT NULL,
                ttl_secs INTEGER NOT NULL,
                digest TEXT NOT NULL,
                PRIMARY KEY (provider, key)
            );

            CREATE INDEX IF NOT EXISTS idx_sync_cache_fetched_at ON sync_cache(fetched_at);
            "#,
        )?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, CacheError> {
        self.conn
            .lock()
            .map_err(|_| CacheError::Database("cache connection lock poisoned".to_string()))
    }

    fn is_fresh(&self, fetched_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - fetched_at <= self.ttl
    }

    /// Counts relative to an explicit clock.
    pub fn stats_at(&self, now: DateTime<Utc>) -> Result<CacheStats, CacheError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT fetched_at FROM sync_cache")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut stats = CacheStats::default();
        for row in rows {
            stats.total_entries += 1;
            match parse_timestamp(&row?) {
                Some(fetched_at) if self.is_fresh(fetched_at, now) => stats.fresh_entries += 1,
                _ => stats.expired_entries += 1,
            }
        }
        Ok(stats)
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

impl SyncCache for SqliteSyncCache {
    fn get_at(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<Option<String>, CacheError> {
        let conn = self.conn()?;
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT fetched_at, digest FROM sync_cache WHERE provider = ?1 AND key = ?2",
                params![key.provider, key.key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let Some((fetched_at, digest)) = row else {
            return Ok(None);
        };

        // Unparseable timestamps read as expired and get rewritten on the next put.
        match parse_timestamp(&fetched_at) {
            Some(fetched_at) if self.is_fresh(fetched_at, now) => Ok(Some(digest)),
            _ => {
                debug!(key = %key, "Cache entry expired");
                Ok(None)
            }
        }
    }

    fn put_at(&self, key: &CacheKey, digest: &str, now: DateTime<Utc>) -> Result<(), CacheError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO sync_cache (provider, key, fetched_at, ttl_secs, digest)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(provider, key) DO UPDATE SET
                fetched_at = excluded.fetched_at,
                ttl_secs = excluded.ttl_secs,
                digest = excluded.digest",
            params![
                key.provider,
                key.key,
                now.to_rfc3339(),
                self.ttl.num_seconds(),
                digest
            ],
        )?;
        Ok(())
    }

    fn reset(&self) -> Result<u64, CacheError> {
        let conn = self.conn()?;
        let removed = conn.execute("DELETE FROM sync_cache", [])?;
        info!(removed, "Sync cache reset");
        Ok(removed as u64)
    }

    fn stats(&self) -> Result<CacheStats, CacheError> {
        self.stats_at(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TTL: u64 = 3600;

    fn create_test_cache() -> SqliteSyncCache {
        SqliteSyncCache::in_memory(TTL).unwrap()
    }

    fn key(id: &str) -> CacheKey {
        CacheKey::new("catalog", format!("scene:{}", id))
    }

    #[test]
    fn test_get_unknown_key() {
        let cache = create_test_cache();
        assert_eq!(cache.get(&key("1")).unwrap(), None);
    }

    #[test]
    fn test_put_then_get() {
        let cache = create_test_cache();
        cache.put(&key("1"), "abc").unwrap();
        assert_eq!(cache.get(&key("1")).unwrap().as_deref(), Some("abc"));
        assert_eq!(cache.get(&key("2")).unwrap(), None);
    }

    #[test]
    fn test_ttl_boundary() {
        let cache = create_test_cache();
        let t = Utc::now();
        cache.put_at(&key("1"), "abc", t).unwrap();

        let ttl = Duration::seconds(TTL as i64);
        let fresh = t + ttl - Duration::seconds(1);
        let exact = t + ttl;
        let stale = t + ttl + Duration::seconds(1);

        assert!(cache.get_at(&key("1"), fresh).unwrap().is_some());
        assert!(cache.get_at(&key("1"), exact).unwrap().is_some());
        assert!(cache.get_at(&key("1"), stale).unwrap().is_none());
    }

    #[test]
    fn test_put_refreshes_entry() {
        let cache = create_test_cache();
        let t = Utc::now();
        cache.put_at(&key("1"), "old", t).unwrap();

        let later = t + Duration::seconds(TTL as i64 - 10);
        cache.put_at(&key("1"), "new", later).unwrap();

        let check = t + Duration::seconds(TTL as i64 + 10);
        assert_eq!(
            cache.get_at(&key("1"), check).unwrap().as_deref(),
            Some("new")
        );
    }

    #[test]
    fn test_keys_are_scoped_by_provider() {
        let cache = create_test_cache();
        cache.put(&CacheKey::new("stashdb", "x"), "a").unwrap();
        assert!(cache.get(&CacheKey::new("tpdb", "x")).unwrap().is_none());
    }

    #[test]
    fn test_reset() {
        let cache = create_test_cache();
        cache.put(&key("1"), "a").unwrap();
        cache.put(&key("2"), "b").unwrap();

        assert_eq!(cache.reset().unwrap(), 2);
        assert!(cache.get(&key("1")).unwrap().is_none());
        assert_eq!(cache.stats().unwrap().total_entries, 0);
    }

    #[test]
    fn test_stats() {
        let cache = create_test_cache();
        let t = Utc::now();
        cache.put_at(&key("1"), "a", t).unwrap();
        cache
            .put_at(&key("2"), "b", t - Duration::seconds(TTL as i64 * 2))
            .unwrap();

        let stats = cache.stats_at(t).unwrap();
        assert_eq!(stats.total_entries, 2);
        assert_eq!(stats.fresh_entries, 1);
        assert_eq!(stats.expired_entries, 1);
    }

    #[test]
    fn test_configured_ttl_wins_over_stored_ttl() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cache.db");
        let t = Utc::now();

        {
            let long = SqliteSyncCache::new(&path, 10 * TTL).unwrap();
            long.put_at(&key("1"), "a", t).unwrap();
        }

        let short = SqliteSyncCache::new(&path, TTL).unwrap();
        let later = t + Duration::seconds(TTL as i64 + 1);
        assert!(short.get_at(&key("1"), later).unwrap().is_none());
    }

    #[test]
    fn test_survives_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("cache.db");

        SqliteSyncCache::new(&path, TTL)
            .unwrap()
            .put(&key("1"), "digest")
            .unwrap();

        let reopened = SqliteSyncCache::new(&path, TTL).unwrap();
        assert_eq!(
            reopened.get(&key("1")).unwrap().as_deref(),
            Some("digest")
        );
    }

    #[test]
    fn test_open_creates_parent_directory() {
        let temp = TempDir::new().unwrap();
        let config = CacheConfig {
            path: temp.path().join("state/curator/cache.db"),
            ttl_secs: TTL,
        };
        let cache = SqliteSyncCache::open(&config, &PermissionPolicy::default()).unwrap();
        cache.put(&key("1"), "a").unwrap();
        assert!(config.path.exists());
    }
}
