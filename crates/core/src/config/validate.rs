use super::{types::Config, ConfigError};

/// Validate configuration
/// Currently validates:
/// - Catalog section has a URL and a non-zero page size
/// - Reconcile concurrency and cache TTL are non-zero
/// - Watcher library root does not live inside the torrent root
/// - Permission modes keep the shared-group invariant
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.catalog.url.trim().is_empty() {
        return Err(ConfigError::ValidationError(
            "catalog.url cannot be empty".to_string(),
        ));
    }

    if config.catalog.page_size == 0 {
        return Err(ConfigError::ValidationError(
            "catalog.page_size cannot be 0".to_string(),
        ));
    }

    if config.reconcile.max_concurrent == 0 {
        return Err(ConfigError::ValidationError(
            "reconcile.max_concurrent cannot be 0".to_string(),
        ));
    }

    if config.cache.ttl_secs == 0 {
        return Err(ConfigError::ValidationError(
            "cache.ttl_secs cannot be 0".to_string(),
        ));
    }

    if let Some(watcher) = &config.watcher {
        if watcher.library_root.starts_with(&watcher.torrent_root) {
            return Err(ConfigError::ValidationError(format!(
                "watcher.library_root ({}) must not be inside watcher.torrent_root ({})",
                watcher.library_root.display(),
                watcher.torrent_root.display()
            )));
        }
        if watcher.max_parallel_imports == 0 {
            return Err(ConfigError::ValidationError(
                "watcher.max_parallel_imports cannot be 0".to_string(),
            ));
        }
        if watcher.lock_marker.is_empty() || watcher.lock_marker.contains('/') {
            return Err(ConfigError::ValidationError(
                "watcher.lock_marker must be a plain file name".to_string(),
            ));
        }
    }

    config
        .permissions
        .validate()
        .map_err(|e| ConfigError::ValidationError(e.to_string()))?;

    Ok(())
}
