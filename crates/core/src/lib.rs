pub mod automation;
pub mod catalog;
pub mod client;
pub mod config;
pub mod metrics;
pub mod permissions;
pub mod provider;
pub mod reconcile;
pub mod sync_cache;
pub mod testing;
pub mod watcher;

pub use automation::{AutomationUpdate, DownloadAutomation, PushOutcome, WhisparrClient};
pub use catalog::{
    wait_for_job, wait_until_healthy, CatalogEntity, CatalogService, EntityFields, EntityKind,
    JobStatus, StashClient,
};
pub use client::{ClientError, RetryPolicy};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, LogFormat,
    SanitizedConfig,
};
pub use permissions::{PermissionError, PermissionPolicy};
pub use provider::{MetadataProvider, ProviderRecord, StashBoxClient, TpdbClient};
pub use reconcile::{ReconcileError, Reconciler, RunReport};
pub use sync_cache::{CacheError, CacheKey, SqliteSyncCache, SyncCache};
pub use watcher::{Watcher, WatcherConfig, WatcherError, WatcherStatus};
