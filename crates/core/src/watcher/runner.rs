//! Watcher poll loop.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use chrono::Utc;
use tokio::sync::{broadcast, Mutex, RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::classify::scan_root;
use super::config::WatcherConfig;
use super::importer::Importer;
use super::types::{EntryState, ImportOutcome, PollSummary, WatcherError, WatcherStatus};
use crate::catalog::CatalogService;
use crate::permissions::PermissionPolicy;

/// Import results kept for the status API.
const RECENT_IMPORTS: usize = 50;

/// Polls the torrent root and imports completed entries.
pub struct Watcher {
    config: Arc<WatcherConfig>,
    policy: Arc<PermissionPolicy>,
    importer: Arc<Importer>,
    semaphore: Arc<Semaphore>,

    // Runtime state
    running: Arc<AtomicBool>,
    status: Arc<RwLock<WatcherStatus>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    tasks: Mutex<JoinSet<()>>,
}

impl Watcher {
    pub fn new(
        config: WatcherConfig,
        policy: PermissionPolicy,
        catalog: Arc<dyn CatalogService>,
    ) -> Self {
        let config = Arc::new(config);
        let policy = Arc::new(policy);
        let importer = Arc::new(Importer::new(
            Arc::clone(&config),
            Arc::clone(&policy),
            catalog,
        ));
        let permits = config.max_parallel_imports.max(1);

        Self {
            config,
            policy,
            importer,
            semaphore: Arc::new(Semaphore::new(permits)),
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(RwLock::new(WatcherStatus::default())),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    /// Create both roots under the permission policy and repair the
    /// configured trees.
    pub async fn prepare(&self) -> Result<(), WatcherError> {
        let policy = Arc::clone(&self.policy);
        let config = Arc::clone(&self.config);

        tokio::task::spawn_blocking(move || -> Result<(), WatcherError> {
            policy.create_dir_all(&config.torrent_root)?;
            policy.create_dir_all(&config.library_root)?;

            for root in &policy.repair_roots {
                let stats = policy.repair_tree(root);
                info!(
                    root = %root.display(),
                    directories = stats.directories,
                    files = stats.files,
                    fixed = stats.fixed,
                    errors = stats.errors,
                    "Permission repair finished"
                );
            }
            Ok(())
        })
        .await
        .map_err(|e| WatcherError::Task(e.to_string()))?
    }

    /// Run one poll as of `now`: classify entries and start imports for the
    /// complete ones. Imports run in the background; see
    /// [`wait_idle`](Self::wait_idle).
    pub async fn poll_at(&self, now: SystemTime) -> Result<PollSummary, WatcherError> {
        let config = Arc::clone(&self.config);
        let entries = tokio::task::spawn_blocking(move || scan_root(&config, now))
            .await
            .map_err(|e| WatcherError::Task(e.to_string()))??;

        let mut summary = PollSummary {
            entries: entries.len(),
            ..Default::default()
        };

        let mut tasks = self.tasks.lock().await;
        while let Some(result) = tasks.try_join_next() {
            log_join(result);
        }

        for entry in entries {
            match entry.state {
                EntryState::Downloading => {
                    summary.downloading += 1;
                    continue;
                }
                EntryState::Complete => summary.complete += 1,
                EntryState::Importing => {
                    summary.importing += 1;
                    continue;
                }
                EntryState::Failed => {
                    summary.failed += 1;
                    continue;
                }
                EntryState::Imported => continue,
            }

            if !self.in_flight.lock().await.insert(entry.name.clone()) {
                debug!(entry = %entry.name, "Import already in flight");
                continue;
            }
            summary.started += 1;

            let importer = Arc::clone(&self.importer);
            let semaphore = Arc::clone(&self.semaphore);
            let status = Arc::clone(&self.status);
            let in_flight = Arc::clone(&self.in_flight);

            tasks.spawn(async move {
                let mut outcome = match semaphore.acquire_owned().await {
                    Ok(_permit) => Some(importer.import(&entry).await),
                    Err(_) => None,
                };
                in_flight.lock().await.remove(&entry.name);

                // Outside the import slot: waits on catalog jobs.
                if let Some(ImportOutcome::Finished(record)) = &mut outcome {
                    importer.follow_up(record).await;
                }

                let mut status = status.write().await;
                match outcome {
                    Some(ImportOutcome::Finished(record)) => {
                        match record.state {
                            EntryState::Imported => status.imported += 1,
                            _ => status.failed += 1,
                        }
                        status.recent.push(record);
                        if status.recent.len() > RECENT_IMPORTS {
                            let excess = status.recent.len() - RECENT_IMPORTS;
                            status.recent.drain(..excess);
                        }
                    }
                    Some(ImportOutcome::Conflict) => status.lock_conflicts += 1,
                    None => warn!(entry = %entry.name, "Import slot unavailable"),
                }
            });
        }
        drop(tasks);

        let in_flight = self.in_flight.lock().await.len();
        let mut status = self.status.write().await;
        status.polls += 1;
        status.last_poll = Some(Utc::now());
        status.last_summary = Some(summary);
        status.in_flight = in_flight;

        debug!(
            entries = summary.entries,
            downloading = summary.downloading,
            complete = summary.complete,
            importing = summary.importing,
            failed = summary.failed,
            started = summary.started,
            "Poll finished"
        );
        Ok(summary)
    }

    /// Wait for every started import to finish.
    pub async fn wait_idle(&self) {
        let mut tasks = self.tasks.lock().await;
        while let Some(result) = tasks.join_next().await {
            log_join(result);
        }
        self.status.write().await.in_flight = 0;
    }

    /// Poll until `shutdown` fires, then let in-flight imports finish.
    pub async fn run(&self, mut shutdown: broadcast::Receiver<()>) -> Result<(), WatcherError> {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Watcher already running");
            return Ok(());
        }
        self.status.write().await.running = true;

        info!(
            torrent_root = %self.config.torrent_root.display(),
            library_root = %self.config.library_root.display(),
            poll_interval_secs = self.config.poll_interval_secs,
            "Watcher started"
        );

        let interval = Duration::from_secs(self.config.poll_interval_secs.max(1));
        loop {
            if let Err(e) = self.poll_at(SystemTime::now()).await {
                error!(error = %e, "Poll failed");
            }

            tokio::select! {
                _ = shutdown.recv() => {
                    info!("Watcher received shutdown signal");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("Waiting for in-flight imports");
        self.wait_idle().await;
        self.status.write().await.running = false;
        info!("Watcher stopped");
        Ok(())
    }

    pub async fn status(&self) -> WatcherStatus {
        let mut status = self.status.read().await.clone();
        status.in_flight = self.in_flight.lock().await.len();
        status
    }
}

fn log_join(result: Result<(), tokio::task::JoinError>) {
    if let Err(e) = result {
        error!(error = %e, "Import task failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCatalog;
    use std::fs;
    use tempfile::TempDir;

    fn watcher(dir: &TempDir) -> (Watcher, Arc<MockCatalog>) {
        let config = WatcherConfig::new(dir.path().join("torrents"), dir.path().join("library"));
        let catalog = Arc::new(MockCatalog::new());
        (
            Watcher::new(config, PermissionPolicy::default(), catalog.clone()),
            catalog,
        )
    }

    fn later(secs: u64) -> SystemTime {
        SystemTime::now() + Duration::from_secs(secs)
    }

    #[tokio::test]
    async fn test_prepare_creates_roots() {
        let dir = TempDir::new().unwrap();
        let (watcher, _) = watcher(&dir);

        watcher.prepare().await.unwrap();

        assert!(dir.path().join("torrents").is_dir());
        assert!(dir.path().join("library").is_dir());
    }

    #[tokio::test]
    async fn test_poll_imports_complete_entries_only() {
        let dir = TempDir::new().unwrap();
        let (watcher, catalog) = watcher(&dir);
        watcher.prepare().await.unwrap();

        let torrents = dir.path().join("torrents");
        fs::write(torrents.join("done.mp4"), b"data").unwrap();
        fs::create_dir(torrents.join("busy")).unwrap();
        fs::write(torrents.join("busy/.incomplete"), b"").unwrap();

        let summary = watcher.poll_at(later(3600)).await.unwrap();
        watcher.wait_idle().await;

        assert_eq!(summary.entries, 2);
        assert_eq!(summary.downloading, 1);
        assert_eq!(summary.started, 1);
        assert!(dir.path().join("library/done.mp4").exists());
        assert!(torrents.join("busy").exists());
        assert_eq!(catalog.scans().await.len(), 1);

        let status = watcher.status().await;
        assert_eq!(status.imported, 1);
        assert_eq!(status.polls, 1);
        assert_eq!(status.in_flight, 0);
        assert_eq!(status.recent[0].name, "done.mp4");
    }

    #[tokio::test]
    async fn test_poll_skips_claimed_and_failed_entries() {
        let dir = TempDir::new().unwrap();
        let (watcher, catalog) = watcher(&dir);
        watcher.prepare().await.unwrap();

        let torrents = dir.path().join("torrents");
        fs::create_dir(torrents.join("Claimed")).unwrap();
        fs::write(torrents.join("Claimed/.curator-import.lock"), b"{}").unwrap();
        fs::write(torrents.join("broken.mp4"), b"data").unwrap();
        crate::watcher::Claim::acquire(&torrents.join("broken.mp4"), false, ".curator-import.lock")
            .unwrap()
            .fail("disk full")
            .unwrap();

        let summary = watcher.poll_at(later(3600)).await.unwrap();
        watcher.wait_idle().await;

        assert_eq!(summary.importing, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.started, 0);
        assert!(catalog.scans().await.is_empty());
        let status = watcher.status().await;
        assert_eq!(status.lock_conflicts, 0);
        assert_eq!(status.failed, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let (watcher, _) = watcher(&dir);
        watcher.prepare().await.unwrap();
        let watcher = Arc::new(watcher);

        let (tx, rx) = broadcast::channel(1);
        let handle = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.run(rx).await })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(watcher.status().await.running);
        tx.send(()).unwrap();

        handle.await.unwrap().unwrap();
        let status = watcher.status().await;
        assert!(!status.running);
        assert!(status.polls >= 1);
    }
}
