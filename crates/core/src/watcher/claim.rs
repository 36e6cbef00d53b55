//! Exclusive claims on torrent root entries.
//!
//! A claim is a marker file created with create-if-absent semantics. It is
//! the only thing keeping two importers (in this process or another) off the
//! same entry.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::types::WatcherError;

/// Contents of a claim marker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClaimRecord {
    pub claim_id: String,
    pub pid: u32,
    pub claimed_at: DateTime<Utc>,
    /// Set when the import failed and the marker was left behind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A held claim.
#[derive(Debug)]
pub struct Claim {
    marker: PathBuf,
    is_dir: bool,
    lock_marker: String,
    record: ClaimRecord,
}

/// Where the marker for `entry` lives: inside a directory, or as a hidden
/// sidecar next to a plain file.
pub fn marker_path(entry: &Path, is_dir: bool, lock_marker: &str) -> PathBuf {
    if is_dir {
        return entry.join(lock_marker);
    }
    let name = entry
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sidecar = format!(".{}{}", name, lock_marker);
    match entry.parent() {
        Some(parent) => parent.join(sidecar),
        None => PathBuf::from(sidecar),
    }
}

impl Claim {
    /// Try to claim `entry`. Fails with `LockConflict` if a marker exists.
    pub fn acquire(entry: &Path, is_dir: bool, lock_marker: &str) -> Result<Self, WatcherError> {
        let marker = marker_path(entry, is_dir, lock_marker);
        let record = ClaimRecord {
            claim_id: Uuid::new_v4().to_string(),
            pid: std::process::id(),
            claimed_at: Utc::now(),
            error: None,
        };

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&marker) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(WatcherError::LockConflict(entry.to_path_buf()))
            }
            Err(e) => return Err(WatcherError::io("create claim marker", &marker, e)),
        };
        write_record(&mut file, &record).map_err(|e| WatcherError::io("write claim marker", &marker, e))?;

        Ok(Self {
            marker,
            is_dir,
            lock_marker: lock_marker.to_string(),
            record,
        })
    }

    pub fn id(&self) -> &str {
        &self.record.claim_id
    }

    pub fn marker(&self) -> &Path {
        &self.marker
    }

    /// Release after a successful move to `destination`. A directory's
    /// marker travelled with it.
    pub fn release(self, destination: &Path) -> Result<(), WatcherError> {
        let marker = if self.is_dir {
            destination.join(&self.lock_marker)
        } else {
            self.marker
        };
        match fs::remove_file(&marker) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WatcherError::io("remove claim marker", &marker, e)),
        }
    }

    /// Keep the marker in place, recording why the import failed.
    pub fn fail(mut self, error: &str) -> Result<(), WatcherError> {
        self.record.error = Some(error.to_string());
        let mut file = fs::File::create(&self.marker)
            .map_err(|e| WatcherError::io("rewrite claim marker", &self.marker, e))?;
        write_record(&mut file, &self.record)
            .map_err(|e| WatcherError::io("rewrite claim marker", &self.marker, e))
    }
}

fn write_record(file: &mut fs::File, record: &ClaimRecord) -> io::Result<()> {
    let body = serde_json::to_vec_pretty(record).map_err(io::Error::other)?;
    file.write_all(&body)?;
    file.sync_all()
}

/// Read a marker left behind by an earlier claim.
pub fn read_marker(marker: &Path) -> Result<ClaimRecord, WatcherError> {
    let body = fs::read(marker).map_err(|e| WatcherError::io("read claim marker", marker, e))?;
    serde_json::from_slice(&body).map_err(|e| {
        WatcherError::io("parse claim marker", marker, io::Error::new(io::ErrorKind::InvalidData, e))
    })
}
