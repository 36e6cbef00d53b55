//! Download watcher.
//!
//! Polls the torrent root, waits for entries to go quiet, claims them with
//! a marker file and moves them into the library:
//! - `downloading`: markers or partial sidecars present, or recently written
//! - `complete`: quiet for `quiet_period_secs`, ready to claim
//! - `importing`: claimed, move in progress
//! - `imported` / `failed`: after the move; a failed entry keeps its marker
//!   until an operator removes it

mod claim;
mod classify;
mod config;
mod importer;
mod post_scan;
mod runner;
mod types;

pub use claim::{marker_path, read_marker, Claim, ClaimRecord};
pub use classify::{newest_mtime, scan_root};
pub use config::{PathMapping, PostScanConfig, WatcherConfig};
pub use importer::Importer;
pub use post_scan::{PostScan, PostScanReport};
pub use runner::Watcher;
pub use types::*;
