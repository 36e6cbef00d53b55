//! Shared-group permission scheme.
//!
//! Several privilege-dropped processes write into the same torrent and
//! library trees. They cooperate through a common group: every directory we
//! create or touch carries the set-group-ID bit and group-write, so new
//! children inherit the group and stay writable by the siblings.

mod policy;

pub use policy::{PermissionPolicy, RepairStats};

use std::path::PathBuf;
use thiserror::Error;

/// Errors from permission enforcement.
#[derive(Debug, Error)]
pub enum PermissionError {
    /// The policy itself would break the shared-group invariant.
    #[error("invalid permission policy: {0}")]
    InvalidPolicy(String),

    /// Creating a directory failed.
    #[error("failed to create directory {path}")]
    CreateFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Changing ownership or mode failed.
    #[error("failed to apply permissions to {path}")]
    ApplyFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
