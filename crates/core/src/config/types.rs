use serde::{Deserialize, Serialize};
use std::net::IpAddr;

use crate::automation::WhisparrConfig;
use crate::catalog::StashConfig;
use crate::client::RetryPolicy;
use crate::permissions::PermissionPolicy;
use crate::provider::{StashBoxConfig, TpdbConfig};
use crate::reconcile::ReconcileConfig;
use crate::sync_cache::CacheConfig;
use crate::watcher::WatcherConfig;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub logging: LoggingConfig,
    pub catalog: StashConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub automation: AutomationConfig,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub watcher: Option<WatcherConfig>,
    #[serde(default)]
    pub permissions: PermissionPolicy,
    #[serde(default)]
    pub server: Option<ServerConfig>,
}

/// Log output configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_log_filter")]
    pub filter: String,
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// External metadata providers. Each one is optional; the engine only
/// consults the providers that are configured, in declaration order.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProvidersConfig {
    #[serde(default)]
    pub stashdb: Option<StashBoxConfig>,
    #[serde(default)]
    pub tpdb: Option<TpdbConfig>,
}

/// Download automation services.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AutomationConfig {
    #[serde(default)]
    pub whisparr: Option<WhisparrConfig>,
}

/// Status API for the long-running watcher
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([127, 0, 0, 1])
}

fn default_port() -> u16 {
    8095
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub catalog: SanitizedEndpoint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stashdb: Option<SanitizedEndpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tpdb: Option<SanitizedEndpoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub whisparr: Option<SanitizedEndpoint>,
    pub cache: CacheConfig,
    pub reconcile: ReconcileConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watcher: Option<WatcherConfig>,
    pub permissions: PermissionPolicy,
}

/// A remote service with its credential hidden
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedEndpoint {
    pub url: String,
    pub api_key_configured: bool,
}

impl SanitizedEndpoint {
    fn new(url: &str, api_key: &str) -> Self {
        Self {
            url: url.to_string(),
            api_key_configured: !api_key.is_empty(),
        }
    }
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            catalog: SanitizedEndpoint::new(&config.catalog.url, &config.catalog.api_key),
            stashdb: config
                .providers
                .stashdb
                .as_ref()
                .map(|p| SanitizedEndpoint::new(&p.url, &p.api_key)),
            tpdb: config
                .providers
                .tpdb
                .as_ref()
                .map(|p| SanitizedEndpoint::new(&p.url, &p.api_key)),
            whisparr: config
                .automation
                .whisparr
                .as_ref()
                .map(|w| SanitizedEndpoint::new(&w.url, &w.api_key)),
            cache: config.cache.clone(),
            reconcile: config.reconcile.clone(),
            watcher: config.watcher.clone(),
            permissions: config.permissions.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[catalog]
url = "http://stash:9999"
api_key = "stash-key"
"#;

    #[test]
    fn test_deserialize_minimal_config() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.catalog.url, "http://stash:9999");
        assert_eq!(config.catalog.page_size, 100);
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.cache.ttl_secs, 7 * 24 * 3600);
        assert!(config.providers.stashdb.is_none());
        assert!(config.watcher.is_none());
        assert!(config.server.is_none());
        assert_eq!(config.permissions.directory_mode, 0o2775);
    }

    #[test]
    fn test_deserialize_missing_catalog_fails() {
        let toml = r#"
[cache]
ttl_secs = 10
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_full_config() {
        let toml = r#"
[logging]
format = "json"
filter = "curator_core=debug"

[catalog]
url = "http://stash:9999"
api_key = "stash-key"

[providers.stashdb]
api_key = "sdb"

[providers.tpdb]
api_key = "tpdb"

[automation.whisparr]
url = "http://whisparr:6969"
api_key = "wh"

[permissions]
group_id = 1000
directory_mode = 0o2775
file_mode = 0o664

[watcher]
torrent_root = "/data/torrents-stash"
library_root = "/data/media/stash"
quiet_period_secs = 30

[server]
port = 9100
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(
            config.providers.stashdb.as_ref().unwrap().url,
            "https://stashdb.org/graphql"
        );
        assert_eq!(
            config.providers.tpdb.as_ref().unwrap().url,
            "https://api.theporndb.net"
        );
        assert_eq!(config.permissions.group_id, Some(1000));
        let watcher = config.watcher.as_ref().unwrap();
        assert_eq!(watcher.quiet_period_secs, 30);
        assert_eq!(watcher.lock_marker, ".curator-import.lock");
        assert_eq!(config.server.as_ref().unwrap().port, 9100);
    }

    #[test]
    fn test_sanitized_config_hides_keys() {
        let toml = r#"
[catalog]
url = "http://stash:9999"
api_key = "stash-key"

[providers.tpdb]
api_key = ""
"#;
        let config: Config = toml::from_str(toml).unwrap();
        let sanitized = SanitizedConfig::from(&config);
        assert!(sanitized.catalog.api_key_configured);
        assert!(!sanitized.tpdb.as_ref().unwrap().api_key_configured);
        assert!(sanitized.stashdb.is_none());

        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("stash-key"));
    }
}
