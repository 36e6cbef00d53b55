//! Catalog follow-up once an import scan has run: stash-box identification
//! of unorganized scenes, then metadata generation.
//!
//! Scenes that stay unorganized after an identify run are remembered in a
//! JSON file and left out of later runs, so a scene no stash-box knows is
//! not resubmitted after every import.

use std::collections::BTreeSet;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::config::PostScanConfig;
use crate::catalog::{wait_for_job, CatalogService, JobStatus};
use crate::metrics;

/// What a post-scan run did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PostScanReport {
    /// Scenes submitted for identification.
    pub submitted: usize,
    /// Submitted scenes still unorganized afterwards.
    pub shunned: usize,
    pub generate_job: Option<String>,
    /// Steps that failed. None of them undo the import.
    pub errors: Vec<String>,
}

/// Runs follow-up catalog tasks, one run at a time.
pub struct PostScan {
    config: PostScanConfig,
    catalog: Arc<dyn CatalogService>,
    running: Mutex<()>,
}

impl PostScan {
    pub fn new(config: PostScanConfig, catalog: Arc<dyn CatalogService>) -> Self {
        Self {
            config,
            catalog,
            running: Mutex::new(()),
        }
    }

    fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.config.job_timeout_secs)
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.job_poll_interval_ms)
    }

    /// Wait for `scan_job`, then run the configured tasks.
    pub async fn run(&self, scan_job: &str) -> PostScanReport {
        let _running = self.running.lock().await;
        let mut report = PostScanReport::default();

        match wait_for_job(
            self.catalog.as_ref(),
            scan_job,
            self.job_timeout(),
            self.poll_interval(),
        )
        .await
        {
            Ok(Some(JobStatus::Finished)) | Ok(None) => {}
            Ok(Some(status)) => {
                report
                    .errors
                    .push(format!("scan job {} ended {:?}", scan_job, status));
                return report;
            }
            Err(e) => {
                report.errors.push(format!("scan job {}: {}", scan_job, e));
                return report;
            }
        }

        if self.config.identify {
            let result = self.identify(&mut report).await;
            record("identify", result, &mut report);
        }

        if self.config.generate {
            match self.catalog.generate_metadata().await {
                Ok(job) => {
                    info!(job = %job, "Metadata generation started");
                    report.generate_job = Some(job);
                    record("generate", Ok(()), &mut report);
                }
                Err(e) => record("generate", Err(e.to_string()), &mut report),
            }
        }

        report
    }

    async fn identify(&self, report: &mut PostScanReport) -> Result<(), String> {
        let shunned = load_shunned(&self.config.shunned_path).await;
        let candidates: Vec<String> = self
            .catalog
            .unorganized_scenes()
            .await
            .map_err(|e| e.to_string())?
            .into_iter()
            .filter(|id| !shunned.contains(id))
            .collect();

        if candidates.is_empty() {
            debug!(shunned = shunned.len(), "No unorganized scenes to identify");
            return Ok(());
        }

        info!(scenes = candidates.len(), "Identifying unorganized scenes");
        report.submitted = candidates.len();
        let job = self
            .catalog
            .identify_scenes(&candidates)
            .await
            .map_err(|e| e.to_string())?;
        match wait_for_job(
            self.catalog.as_ref(),
            &job,
            self.job_timeout(),
            self.poll_interval(),
        )
        .await
        {
            Ok(Some(JobStatus::Finished)) | Ok(None) => {}
            Ok(Some(status)) => return Err(format!("identify job {} ended {:?}", job, status)),
            Err(e) => return Err(format!("identify job {}: {}", job, e)),
        }

        let still: BTreeSet<String> = self
            .catalog
            .unorganized_scenes()
            .await
            .map_err(|e| e.to_string())?
            .into_iter()
            .filter(|id| candidates.contains(id))
            .collect();
        report.shunned = still.len();
        if still.is_empty() {
            return Ok(());
        }

        info!(scenes = still.len(), "Shunning scenes identification could not organize");
        let mut updated = shunned;
        updated.extend(still);
        save_shunned(&self.config.shunned_path, &updated)
            .await
            .map_err(|e| format!("write {}: {}", self.config.shunned_path.display(), e))
    }
}

fn record(task: &str, result: Result<(), String>, report: &mut PostScanReport) {
    match result {
        Ok(()) => {
            metrics::POST_SCAN_TASKS.with_label_values(&[task, "ok"]).inc();
        }
        Err(e) => {
            metrics::POST_SCAN_TASKS.with_label_values(&[task, "error"]).inc();
            warn!(task, error = %e, "Post-scan task failed");
            report.errors.push(format!("{}: {}", task, e));
        }
    }
}

/// Shunned scene ids. A missing or unreadable file counts as empty.
async fn load_shunned(path: &Path) -> BTreeSet<String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Ignoring malformed shunned scenes file");
            BTreeSet::new()
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => BTreeSet::new(),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Failed to read shunned scenes file");
            BTreeSet::new()
        }
    }
}

async fn save_shunned(path: &Path, ids: &BTreeSet<String>) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(ids).map_err(io::Error::other)?;
    let mut temp = path.as_os_str().to_owned();
    temp.push(".tmp");
    tokio::fs::write(&temp, json).await?;
    tokio::fs::rename(&temp, path).await
}
