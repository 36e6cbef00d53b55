//! Types for the download watcher.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::permissions::PermissionError;

/// Errors from watching and importing.
#[derive(Debug, Error)]
pub enum WatcherError {
    /// Filesystem operation failed.
    #[error("{operation} failed for {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Another importer holds (or a failed import left) the claim marker.
    #[error("entry already claimed: {0}")]
    LockConflict(PathBuf),

    /// The library already has an entry with this name.
    #[error("destination already exists: {0}")]
    DestinationExists(PathBuf),

    /// Permission enforcement failed.
    #[error(transparent)]
    Permission(#[from] PermissionError),

    /// A background task panicked or was cancelled.
    #[error("watcher task failed: {0}")]
    Task(String),
}

impl WatcherError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }
}

/// Lifecycle of a top-level entry in the torrent root.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    /// Still being written by a download client.
    Downloading,
    /// Quiet for long enough; ready to claim.
    Complete,
    /// Claimed by an importer.
    Importing,
    /// Moved into the library.
    Imported,
    /// Import attempted and failed; the claim marker stays behind.
    Failed,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryState::Downloading => "downloading",
            EntryState::Complete => "complete",
            EntryState::Importing => "importing",
            EntryState::Imported => "imported",
            EntryState::Failed => "failed",
        }
    }
}

/// A classified entry of the torrent root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEntry {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
    pub state: EntryState,
}

/// Result of one import attempt.
#[derive(Debug, Clone, Serialize)]
pub struct ImportRecord {
    pub name: String,
    pub source: PathBuf,
    pub destination: PathBuf,
    /// `Imported` or `Failed`.
    pub state: EntryState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Problems after the move that did not undo the import.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Catalog scan job, when the trigger succeeded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scan_job: Option<String>,
    pub finished_at: DateTime<Utc>,
}

/// Outcome of handing an entry to the importer.
#[derive(Debug, Clone)]
pub enum ImportOutcome {
    Finished(ImportRecord),
    /// The claim marker already existed; nothing was touched.
    Conflict,
}

/// Counts from one poll of the torrent root.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PollSummary {
    pub entries: usize,
    pub downloading: usize,
    pub complete: usize,
    /// Claimed by an import still running.
    pub importing: usize,
    /// Left behind by a failed import, waiting for an operator.
    pub failed: usize,
    /// Imports started by this poll.
    pub started: usize,
}

/// Snapshot served by the status API.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WatcherStatus {
    pub running: bool,
    pub polls: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_poll: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_summary: Option<PollSummary>,
    pub in_flight: usize,
    pub imported: u64,
    pub failed: u64,
    pub lock_conflicts: u64,
    /// Most recent import results, newest last.
    pub recent: Vec<ImportRecord>,
}
