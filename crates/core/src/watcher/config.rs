//! Watcher configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Configuration for the download watcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Directory the download clients write into.
    pub torrent_root: PathBuf,

    /// Library tree completed entries are moved into.
    pub library_root: PathBuf,

    /// How often to poll the torrent root (seconds).
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// An entry must be untouched this long before it counts as complete.
    #[serde(default = "default_quiet_period")]
    pub quiet_period_secs: u64,

    /// Files inside a directory entry that mark it as still downloading.
    #[serde(default = "default_in_progress_markers")]
    pub in_progress_markers: Vec<String>,

    /// Suffixes download clients append to partial files.
    #[serde(default = "default_partial_suffixes")]
    pub partial_suffixes: Vec<String>,

    /// Name of the claim marker.
    #[serde(default = "default_lock_marker")]
    pub lock_marker: String,

    /// Maximum imports running at once.
    #[serde(default = "default_max_parallel_imports")]
    pub max_parallel_imports: usize,

    /// Rewrites applied to library paths before asking the catalog to scan
    /// them, for when the catalog sees the library under another mount.
    #[serde(default)]
    pub scan_path_mappings: Vec<PathMapping>,

    /// Catalog tasks to run once an import scan finishes.
    #[serde(default)]
    pub post_scan: PostScanConfig,
}

/// Follow-up work after the catalog scans an import. Off unless a task is
/// switched on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostScanConfig {
    /// Identify unorganized scenes against the stash-boxes.
    #[serde(default)]
    pub identify: bool,

    /// Generate previews and fingerprints for new media.
    #[serde(default)]
    pub generate: bool,

    /// How long to wait for each catalog job.
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,

    #[serde(default = "default_job_poll_interval")]
    pub job_poll_interval_ms: u64,

    /// JSON list of scene ids identification keeps failing on. They are
    /// left out of later runs.
    #[serde(default = "default_shunned_path")]
    pub shunned_path: PathBuf,
}

impl Default for PostScanConfig {
    fn default() -> Self {
        Self {
            identify: false,
            generate: false,
            job_timeout_secs: default_job_timeout(),
            job_poll_interval_ms: default_job_poll_interval(),
            shunned_path: default_shunned_path(),
        }
    }
}

impl PostScanConfig {
    pub fn enabled(&self) -> bool {
        self.identify || self.generate
    }
}

/// Host path prefix and the prefix the catalog knows it by.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathMapping {
    pub host: PathBuf,
    pub catalog: PathBuf,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_quiet_period() -> u64 {
    60
}

fn default_in_progress_markers() -> Vec<String> {
    vec![".downloading".to_string(), ".incomplete".to_string()]
}

fn default_partial_suffixes() -> Vec<String> {
    vec![".part".to_string(), ".!qB".to_string(), ".!ut".to_string()]
}

fn default_lock_marker() -> String {
    ".curator-import.lock".to_string()
}

fn default_max_parallel_imports() -> usize {
    2
}

fn default_job_timeout() -> u64 {
    3600
}

fn default_job_poll_interval() -> u64 {
    1500
}

fn default_shunned_path() -> PathBuf {
    PathBuf::from("shunned_scenes.json")
}

impl WatcherConfig {
    /// Config with default tuning for the given roots.
    pub fn new(torrent_root: impl Into<PathBuf>, library_root: impl Into<PathBuf>) -> Self {
        Self {
            torrent_root: torrent_root.into(),
            library_root: library_root.into(),
            poll_interval_secs: default_poll_interval(),
            quiet_period_secs: default_quiet_period(),
            in_progress_markers: default_in_progress_markers(),
            partial_suffixes: default_partial_suffixes(),
            lock_marker: default_lock_marker(),
            max_parallel_imports: default_max_parallel_imports(),
            scan_path_mappings: Vec::new(),
            post_scan: PostScanConfig::default(),
        }
    }

    pub fn with_quiet_period_secs(mut self, secs: u64) -> Self {
        self.quiet_period_secs = secs;
        self
    }

    pub fn with_poll_interval_secs(mut self, secs: u64) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    pub fn with_post_scan(mut self, post_scan: PostScanConfig) -> Self {
        self.post_scan = post_scan;
        self
    }

    pub fn with_scan_path_mapping(
        mut self,
        host: impl Into<PathBuf>,
        catalog: impl Into<PathBuf>,
    ) -> Self {
        self.scan_path_mappings.push(PathMapping {
            host: host.into(),
            catalog: catalog.into(),
        });
        self
    }

    /// Library path as the catalog sees it. The first matching mapping wins.
    pub fn catalog_path(&self, path: &Path) -> PathBuf {
        self.scan_path_mappings
            .iter()
            .find_map(|m| {
                path.strip_prefix(&m.host)
                    .ok()
                    .map(|rest| m.catalog.join(rest))
            })
            .unwrap_or_else(|| path.to_path_buf())
    }

    /// The partial suffix `name` ends with, if any.
    pub(crate) fn partial_suffix<'a>(&'a self, name: &str) -> Option<&'a str> {
        self.partial_suffixes
            .iter()
            .map(String::as_str)
            .find(|s| !s.is_empty() && name.len() > s.len() && name.ends_with(s))
    }
}
