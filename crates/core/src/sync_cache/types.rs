use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Cache key: provider name plus an identifier scoped to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub provider: String,
    pub key: String,
}

impl CacheKey {
    pub fn new(provider: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.key)
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub total_entries: u64,
    pub fresh_entries: u64,
    pub expired_entries: u64,
}

/// Cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// SQLite file. Its parent directory is created under the permission policy.
    #[serde(default = "default_path")]
    pub path: PathBuf,

    /// Maximum age in seconds at which an entry is still fresh.
    #[serde(default = "default_ttl")]
    pub ttl_secs: u64,
}

fn default_path() -> PathBuf {
    PathBuf::from("curator-cache.db")
}

fn default_ttl() -> u64 {
    7 * 24 * 3600 // one week
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            ttl_secs: default_ttl(),
        }
    }
}

/// Errors from the identifier cache.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Failed to prepare cache location: {0}")]
    Location(String),
}

impl From<rusqlite::Error> for CacheError {
    fn from(e: rusqlite::Error) -> Self {
        CacheError::Database(e.to_string())
    }
}
