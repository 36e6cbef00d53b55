//! Moves claimed entries into the library.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use super::claim::Claim;
use super::config::WatcherConfig;
use super::post_scan::PostScan;
use super::types::{EntryState, ImportOutcome, ImportRecord, WatchedEntry, WatcherError};
use crate::catalog::CatalogService;
use crate::metrics;
use crate::permissions::PermissionPolicy;

/// Claims, moves and announces completed entries.
pub struct Importer {
    config: Arc<WatcherConfig>,
    policy: Arc<PermissionPolicy>,
    catalog: Arc<dyn CatalogService>,
    post_scan: Option<Arc<PostScan>>,
}

impl Importer {
    pub fn new(
        config: Arc<WatcherConfig>,
        policy: Arc<PermissionPolicy>,
        catalog: Arc<dyn CatalogService>,
    ) -> Self {
        let post_scan = config
            .post_scan
            .enabled()
            .then(|| Arc::new(PostScan::new(config.post_scan.clone(), Arc::clone(&catalog))));
        Self {
            config,
            policy,
            catalog,
            post_scan,
        }
    }

    /// Library path an entry is moved to.
    pub fn destination(&self, name: &str) -> PathBuf {
        self.config.library_root.join(name)
    }

    /// Import one entry. Never returns an error: failures are recorded in
    /// the returned record and left on disk in the claim marker.
    pub async fn import(&self, entry: &WatchedEntry) -> ImportOutcome {
        let claim = match Claim::acquire(&entry.path, entry.is_dir, &self.config.lock_marker) {
            Ok(claim) => claim,
            Err(WatcherError::LockConflict(_)) => {
                debug!(entry = %entry.name, "Entry already claimed, skipping");
                metrics::IMPORTS_TOTAL.with_label_values(&["lock_conflict"]).inc();
                return ImportOutcome::Conflict;
            }
            Err(e) => {
                warn!(entry = %entry.name, error = %e, "Failed to claim entry");
                return ImportOutcome::Finished(self.record(entry, EntryState::Failed, Some(e.to_string()), None));
            }
        };

        let destination = self.destination(&entry.name);
        let started = Instant::now();
        info!(
            entry = %entry.name,
            claim_id = claim.id(),
            destination = %destination.display(),
            "Importing entry"
        );

        if let Err(e) = self.move_entry(entry, &destination).await {
            let message = e.to_string();
            metrics::IMPORTS_TOTAL.with_label_values(&["failed"]).inc();
            metrics::IMPORT_DURATION
                .with_label_values(&["failed"])
                .observe(started.elapsed().as_secs_f64());
            error!(entry = %entry.name, error = %message, "Import failed; claim marker left in place");
            if let Err(e) = claim.fail(&message) {
                warn!(entry = %entry.name, error = %e, "Failed to record import failure in marker");
            }
            return ImportOutcome::Finished(self.record(entry, EntryState::Failed, Some(message), None));
        }

        // The entry is in the library from here on; nothing below fails it.
        let mut warnings = Vec::new();
        let policy = Arc::clone(&self.policy);
        let target = destination.clone();
        if let Err(e) = run_blocking(move || policy.apply_tree(&target).map_err(WatcherError::from)).await {
            warn!(entry = %entry.name, error = %e, "Imported but failed to apply permissions");
            warnings.push(e.to_string());
        }
        if let Err(e) = claim.release(&destination) {
            warn!(entry = %entry.name, error = %e, "Imported but failed to remove claim marker");
            warnings.push(e.to_string());
        }

        let elapsed = started.elapsed().as_secs_f64();
        metrics::IMPORTS_TOTAL.with_label_values(&["imported"]).inc();
        metrics::IMPORT_DURATION
            .with_label_values(&["imported"])
            .observe(elapsed);
        info!(entry = %entry.name, elapsed_secs = elapsed, "Entry imported");

        let scan_job = self.trigger_scan(&destination).await;
        let mut record = self.record(entry, EntryState::Imported, None, scan_job);
        record.warnings = warnings;
        ImportOutcome::Finished(record)
    }

    /// Run the post-scan tasks for an imported record, if configured.
    /// Problems land in the record's warnings.
    pub async fn follow_up(&self, record: &mut ImportRecord) {
        let (Some(post_scan), Some(job)) = (&self.post_scan, &record.scan_job) else {
            return;
        };
        let report = post_scan.run(job).await;
        debug!(entry = %record.name, ?report, "Post-scan tasks finished");
        record
            .warnings
            .extend(report.errors.into_iter().map(|e| format!("post-scan {}", e)));
    }

    async fn move_entry(&self, entry: &WatchedEntry, destination: &Path) -> Result<(), WatcherError> {
        let exists = tokio::fs::try_exists(destination)
            .await
            .map_err(|e| WatcherError::io("stat", destination, e))?;
        if exists {
            return Err(WatcherError::DestinationExists(destination.to_path_buf()));
        }

        match tokio::fs::rename(&entry.path, destination).await {
            Ok(()) => {}
            // Cross-filesystem moves fail with EXDEV (18 on Linux)
            Err(e) if e.kind() == io::ErrorKind::CrossesDevices || e.raw_os_error() == Some(18) => {
                debug!(entry = %entry.name, "Rename crosses filesystems, copying instead");
                let source = entry.path.clone();
                let target = destination.to_path_buf();
                run_blocking(move || copy_then_remove(&source, &target)).await?;
            }
            Err(e) => return Err(WatcherError::io("rename", &entry.path, e)),
        }
        Ok(())
    }

    /// Ask the catalog to pick up `destination`. Failures are only logged.
    async fn trigger_scan(&self, destination: &Path) -> Option<String> {
        let scan_path = self.config.catalog_path(destination);
        let paths = [scan_path.to_string_lossy().into_owned()];
        match self.catalog.trigger_scan(&paths).await {
            Ok(job) => {
                metrics::SCAN_TRIGGERS.with_label_values(&["ok"]).inc();
                info!(path = %paths[0], job = %job, "Catalog scan triggered");
                Some(job)
            }
            Err(e) => {
                metrics::SCAN_TRIGGERS.with_label_values(&["error"]).inc();
                warn!(path = %paths[0], error = %e, "Catalog scan trigger failed");
                None
            }
        }
    }

    fn record(
        &self,
        entry: &WatchedEntry,
        state: EntryState,
        error: Option<String>,
        scan_job: Option<String>,
    ) -> ImportRecord {
        ImportRecord {
            name: entry.name.clone(),
            source: entry.path.clone(),
            destination: self.destination(&entry.name),
            state,
            error,
            scan_job,
            warnings: Vec::new(),
            finished_at: Utc::now(),
        }
    }
}

async fn run_blocking<F>(f: F) -> Result<(), WatcherError>
where
    F: FnOnce() -> Result<(), WatcherError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| WatcherError::Task(e.to_string()))?
}

/// Copy `source` to `destination`, then remove `source`. A partial copy is
/// cleaned up and the source left untouched.
fn copy_then_remove(source: &Path, destination: &Path) -> Result<(), WatcherError> {
    if let Err(e) = copy_tree(source, destination) {
        let cleanup = if destination.is_dir() {
            fs::remove_dir_all(destination)
        } else {
            fs::remove_file(destination)
        };
        if let Err(cleanup_err) = cleanup {
            if cleanup_err.kind() != io::ErrorKind::NotFound {
                warn!(path = %destination.display(), error = %cleanup_err, "Failed to remove partial copy");
            }
        }
        return Err(WatcherError::io("copy", source, e));
    }

    let removed = if source.is_dir() {
        fs::remove_dir_all(source)
    } else {
        fs::remove_file(source)
    };
    removed.map_err(|e| WatcherError::io("remove source", source, e))
}

/// Recreate `source` at `destination`. Symlinks are copied as links.
fn copy_tree(source: &Path, destination: &Path) -> io::Result<()> {
    let walker = WalkDir::new(source)
        .follow_links(false)
        .follow_root_links(false)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry?;
        let target = if entry.depth() == 0 {
            destination.to_path_buf()
        } else {
            let relative = entry.path().strip_prefix(source).map_err(io::Error::other)?;
            destination.join(relative)
        };

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            std::os::unix::fs::symlink(fs::read_link(entry.path())?, &target)?;
        } else if file_type.is_dir() {
            fs::create_dir(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
