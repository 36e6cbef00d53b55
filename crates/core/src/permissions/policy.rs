use std::fs;
use std::io;
use std::os::unix::fs::{chown, MetadataExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use super::PermissionError;

const SETGID: u32 = 0o2000;
const GROUP_WRITE: u32 = 0o020;

/// Group ownership and modes applied to everything curator creates or moves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PermissionPolicy {
    /// Target group. When unset, group ownership is left alone.
    #[serde(default)]
    pub group_id: Option<u32>,

    /// Mode for directories. Must include set-group-ID and group-write.
    #[serde(default = "default_directory_mode")]
    pub directory_mode: u32,

    /// Mode for regular files. When unset, file modes are left alone.
    #[serde(default = "default_file_mode")]
    pub file_mode: Option<u32>,

    /// Trees whose permissions are repaired when the watcher starts.
    #[serde(default)]
    pub repair_roots: Vec<PathBuf>,
}

fn default_directory_mode() -> u32 {
    0o2775
}

fn default_file_mode() -> Option<u32> {
    Some(0o664)
}

impl Default for PermissionPolicy {
    fn default() -> Self {
        Self {
            group_id: None,
            directory_mode: default_directory_mode(),
            file_mode: default_file_mode(),
            repair_roots: Vec::new(),
        }
    }
}

/// Outcome of a best-effort repair walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RepairStats {
    pub directories: usize,
    pub files: usize,
    /// Paths whose group or mode had to change.
    pub fixed: usize,
    pub errors: usize,
}

impl PermissionPolicy {
    /// Sets the target group.
    pub fn with_group(mut self, gid: u32) -> Self {
        self.group_id = Some(gid);
        self
    }

    /// Sets the directory mode.
    pub fn with_directory_mode(mut self, mode: u32) -> Self {
        self.directory_mode = mode;
        self
    }

    /// Check the policy keeps the shared-group invariant.
    pub fn validate(&self) -> Result<(), PermissionError> {
        if self.directory_mode > 0o7777 {
            return Err(PermissionError::InvalidPolicy(format!(
                "permissions.directory_mode {:o} is not a valid mode",
                self.directory_mode
            )));
        }
        if self.directory_mode & SETGID == 0 || self.directory_mode & GROUP_WRITE == 0 {
            return Err(PermissionError::InvalidPolicy(format!(
                "permissions.directory_mode {:o} must include set-group-ID (2000) and group-write (020)",
                self.directory_mode
            )));
        }
        if let Some(mode) = self.file_mode {
            if mode > 0o7777 || mode & GROUP_WRITE == 0 {
                return Err(PermissionError::InvalidPolicy(format!(
                    "permissions.file_mode {:o} must be a valid mode including group-write (020)",
                    mode
                )));
            }
        }
        Ok(())
    }

    /// Create `path` and any missing parents, applying the policy to every
    /// component that had to be created. The final directory always gets the
    /// policy, even when it already existed.
    pub fn create_dir_all(&self, path: &Path) -> Result<(), PermissionError> {
        let mut current = PathBuf::new();
        for component in path.components() {
            current.push(component);
            if matches!(component, Component::RootDir | Component::Prefix(_)) {
                continue;
            }
            match fs::create_dir(&current) {
                Ok(()) => {
                    debug!(path = %current.display(), "Created directory");
                    self.apply_dir(&current)?;
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists && current.is_dir() => {}
                Err(e) => {
                    return Err(PermissionError::CreateFailed {
                        path: current,
                        source: e,
                    })
                }
            }
        }
        self.apply_dir(path)?;
        Ok(())
    }

    /// Apply group and directory mode. Returns whether anything changed.
    pub fn apply_dir(&self, path: &Path) -> Result<bool, PermissionError> {
        self.apply(path, Some(self.directory_mode))
    }

    /// Apply group and file mode. Returns whether anything changed.
    pub fn apply_file(&self, path: &Path) -> Result<bool, PermissionError> {
        self.apply(path, self.file_mode)
    }

    /// Apply the policy to `root` and everything below it.
    ///
    /// Fails on the first error; use [`repair_tree`](Self::repair_tree) for
    /// a best-effort walk.
    pub fn apply_tree(&self, root: &Path) -> Result<(), PermissionError> {
        for entry in tree(root) {
            let entry = entry?;
            if entry.file_type().is_dir() {
                self.apply_dir(entry.path())?;
            } else {
                self.apply_file(entry.path())?;
            }
        }
        Ok(())
    }

    /// Best-effort repair of `root`: errors are logged and counted, never
    /// returned.
    pub fn repair_tree(&self, root: &Path) -> RepairStats {
        let mut stats = RepairStats::default();
        for entry in tree(root) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    stats.errors += 1;
                    warn!(root = %root.display(), error = %e, "Permission repair walk failed");
                    continue;
                }
            };

            let outcome = if entry.file_type().is_dir() {
                stats.directories += 1;
                self.apply_dir(entry.path())
            } else {
                stats.files += 1;
                self.apply_file(entry.path())
            };
            match outcome {
                Ok(true) => stats.fixed += 1,
                Ok(false) => {}
                Err(e) => {
                    stats.errors += 1;
                    warn!(path = %entry.path().display(), error = %e, "Permission repair failed");
                }
            }
        }
        stats
    }

    fn apply(&self, path: &Path, mode: Option<u32>) -> Result<bool, PermissionError> {
        let apply_err = |source: io::Error| PermissionError::ApplyFailed {
            path: path.to_path_buf(),
            source,
        };

        let metadata = fs::symlink_metadata(path).map_err(apply_err)?;
        if metadata.file_type().is_symlink() {
            return Ok(false);
        }

        let mut changed = false;
        if let Some(gid) = self.group_id {
            if metadata.gid() != gid {
                chown(path, None, Some(gid)).map_err(apply_err)?;
                changed = true;
            }
        }

        if let Some(mode) = mode {
            // chown may clear set-group-ID, so compare against fresh metadata.
            let current = if changed {
                fs::metadata(path).map_err(apply_err)?.permissions().mode()
            } else {
                metadata.permissions().mode()
            };
            if current & 0o7777 != mode {
                fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(apply_err)?;
                changed = true;
            }
        }

        Ok(changed)
    }
}

/// Everything under `root`, parents before children. Symlinks, including a
/// symlinked root, are skipped.
fn tree(root: &Path) -> impl Iterator<Item = Result<DirEntry, PermissionError>> + '_ {
    WalkDir::new(root)
        .follow_links(false)
        .follow_root_links(false)
        .into_iter()
        .filter(|entry| !matches!(entry, Ok(e) if e.path_is_symlink()))
        .map(move |entry| entry.map_err(|e| walk_error(root, e)))
}

fn walk_error(root: &Path, error: walkdir::Error) -> PermissionError {
    let path = error.path().unwrap_or(root).to_path_buf();
    let source = error
        .into_io_error()
        .unwrap_or_else(|| io::Error::other("filesystem loop"));
    PermissionError::ApplyFailed { path, source }
}
