//! Mock catalog service for testing.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::catalog::{
    compare_ids, CatalogEntity, CatalogService, EntityKind, EntityPage, EntityUpdate, JobStatus,
};
use crate::client::ClientError;

/// Internal mutable state.
#[derive(Debug, Default)]
struct MockCatalogState {
    entities: BTreeMap<(EntityKind, String), CatalogEntity>,
    updates: Vec<EntityUpdate>,
    scans: Vec<Vec<String>>,
    health_calls: u32,
    unhealthy_polls: u32,
    pages_requested: HashMap<EntityKind, u32>,
    /// Entity repeated at the start of a page, to simulate pagination drift.
    duplicates: HashMap<u32, String>,
    list_error: Option<ClientError>,
    update_error: Option<ClientError>,
    scan_error: Option<ClientError>,
    job_counter: u32,
    /// Scripted job states; the last one sticks. Unscripted jobs finish.
    jobs: HashMap<String, VecDeque<JobStatus>>,
    forgotten_jobs: HashSet<String>,
    job_polls: u32,
    unorganized: BTreeSet<String>,
    /// Scenes an identify run will organize.
    identifiable: HashSet<String>,
    identify_calls: Vec<Vec<String>>,
    identify_error: Option<ClientError>,
    generate_calls: u32,
}

/// Mock implementation of the CatalogService trait.
///
/// Holds entities in memory and applies updates the way the catalog does:
/// set fields are overwritten, external identifiers replaced wholesale.
///
/// # Example
///
/// ```rust,ignore
/// let catalog = MockCatalog::new();
/// catalog.add_entity(fixtures::scene("1", "Scene", None)).await;
///
/// // ... run the reconciler ...
///
/// assert_eq!(catalog.update_count().await, 1);
/// ```
#[derive(Debug, Default)]
pub struct MockCatalog {
    state: Arc<RwLock<MockCatalogState>>,
    /// If set, the next operation fails with this error.
    next_error: Arc<RwLock<Option<ClientError>>>,
}

impl MockCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_entity(&self, entity: CatalogEntity) {
        self.state
            .write()
            .await
            .entities
            .insert((entity.kind, entity.id.clone()), entity);
    }

    pub async fn entity(&self, kind: EntityKind, id: &str) -> Option<CatalogEntity> {
        self.state
            .read()
            .await
            .entities
            .get(&(kind, id.to_string()))
            .cloned()
    }

    /// Updates applied so far.
    pub async fn updates(&self) -> Vec<EntityUpdate> {
        self.state.read().await.updates.clone()
    }

    pub async fn update_count(&self) -> usize {
        self.state.read().await.updates.len()
    }

    /// Paths of every scan requested, one entry per call.
    pub async fn scans(&self) -> Vec<Vec<String>> {
        self.state.read().await.scans.clone()
    }

    pub async fn health_calls(&self) -> u32 {
        self.state.read().await.health_calls
    }

    /// Report unhealthy for the next `polls` health checks.
    pub async fn set_unhealthy_polls(&self, polls: u32) {
        self.state.write().await.unhealthy_polls = polls;
    }

    pub async fn pages_requested(&self, kind: EntityKind) -> u32 {
        self.state
            .read()
            .await
            .pages_requested
            .get(&kind)
            .copied()
            .unwrap_or(0)
    }

    /// Repeat entity `id` at the start of `page` (any kind).
    pub async fn duplicate_on_page(&self, page: u32, id: &str) {
        self.state
            .write()
            .await
            .duplicates
            .insert(page, id.to_string());
    }

    /// Fail every enumeration with `error`.
    pub async fn set_list_error(&self, error: ClientError) {
        self.state.write().await.list_error = Some(error);
    }

    /// Fail every update with `error`.
    pub async fn set_update_error(&self, error: ClientError) {
        self.state.write().await.update_error = Some(error);
    }

    /// Fail every scan trigger with `error`.
    pub async fn set_scan_error(&self, error: ClientError) {
        self.state.write().await.scan_error = Some(error);
    }

    /// Report `statuses` for `job_id`, one per poll.
    pub async fn script_job(&self, job_id: &str, statuses: Vec<JobStatus>) {
        self.state
            .write()
            .await
            .jobs
            .insert(job_id.to_string(), statuses.into());
    }

    /// Answer `None` for `job_id`.
    pub async fn forget_job(&self, job_id: &str) {
        self.state
            .write()
            .await
            .forgotten_jobs
            .insert(job_id.to_string());
    }

    pub async fn job_polls(&self) -> u32 {
        self.state.read().await.job_polls
    }

    /// Scenes reported as unorganized.
    pub async fn set_unorganized(&self, ids: &[&str]) {
        self.state.write().await.unorganized = ids.iter().map(|id| id.to_string()).collect();
    }

    /// Scenes the next identify runs will organize.
    pub async fn set_identifiable(&self, ids: &[&str]) {
        self.state.write().await.identifiable = ids.iter().map(|id| id.to_string()).collect();
    }

    /// Scene ids passed to each identify run.
    pub async fn identify_calls(&self) -> Vec<Vec<String>> {
        self.state.read().await.identify_calls.clone()
    }

    pub async fn set_identify_error(&self, error: ClientError) {
        self.state.write().await.identify_error = Some(error);
    }

    pub async fn generate_calls(&self) -> u32 {
        self.state.read().await.generate_calls
    }

    /// Make the next operation fail.
    pub async fn set_next_error(&self, error: ClientError) {
        *self.next_error.write().await = Some(error);
    }

    async fn take_error(&self) -> Result<(), ClientError> {
        match self.next_error.write().await.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl CatalogService for MockCatalog {
    async fn health(&self) -> Result<bool, ClientError> {
        let mut state = self.state.write().await;
        state.health_calls += 1;
        drop(state);
        self.take_error().await?;

        let mut state = self.state.write().await;
        if state.unhealthy_polls > 0 {
            state.unhealthy_polls -= 1;
            return Ok(false);
        }
        Ok(true)
    }

    async fn list_entities(
        &self,
        kind: EntityKind,
        page: u32,
        per_page: u32,
    ) -> Result<EntityPage, ClientError> {
        self.take_error().await?;
        let mut state = self.state.write().await;
        *state.pages_requested.entry(kind).or_insert(0) += 1;
        if let Some(e) = &state.list_error {
            return Err(e.clone());
        }

        let mut all: Vec<&CatalogEntity> = state
            .entities
            .values()
            .filter(|e| e.kind == kind)
            .collect();
        all.sort_by(|a, b| compare_ids(&a.id, &b.id));
        let total = all.len() as u64;

        let offset = (page.saturating_sub(1) * per_page) as usize;
        let mut entities: Vec<CatalogEntity> = all
            .iter()
            .skip(offset)
            .take(per_page as usize)
            .map(|e| (*e).clone())
            .collect();

        if !entities.is_empty() {
            if let Some(dup) = state.duplicates.get(&page) {
                if let Some(entity) = all.iter().find(|e| &e.id == dup) {
                    entities.insert(0, (*entity).clone());
                }
            }
        }

        Ok(EntityPage { entities, total })
    }

    async fn update_entity(&self, update: &EntityUpdate) -> Result<(), ClientError> {
        self.take_error().await?;
        let mut state = self.state.write().await;
        if let Some(e) = &state.update_error {
            return Err(e.clone());
        }

        let key = (update.kind, update.id.clone());
        let Some(entity) = state.entities.get_mut(&key) else {
            return Err(ClientError::Rejected {
                service: "mock-catalog".to_string(),
                status: 404,
                message: format!("no {} {}", update.kind, update.id),
            });
        };

        let patch = &update.fields;
        if patch.title.is_some() {
            entity.fields.title = patch.title.clone();
        }
        if patch.date.is_some() {
            entity.fields.date = patch.date;
        }
        if patch.details.is_some() {
            entity.fields.details = patch.details.clone();
        }
        if patch.studio.is_some() {
            entity.fields.studio = patch.studio.clone();
        }
        if !patch.performers.is_empty() {
            entity.fields.performers = patch.performers.clone();
        }
        if !patch.urls.is_empty() {
            entity.fields.urls = patch.urls.clone();
        }
        entity.external_ids = update.external_ids.clone();

        state.updates.push(update.clone());
        Ok(())
    }

    async fn trigger_scan(&self, paths: &[String]) -> Result<String, ClientError> {
        self.take_error().await?;
        let mut state = self.state.write().await;
        if let Some(e) = &state.scan_error {
            return Err(e.clone());
        }
        state.scans.push(paths.to_vec());
        Ok(state.next_job())
    }

    async fn job_status(&self, job_id: &str) -> Result<Option<JobStatus>, ClientError> {
        self.take_error().await?;
        let mut state = self.state.write().await;
        state.job_polls += 1;
        if state.forgotten_jobs.contains(job_id) {
            return Ok(None);
        }
        let status = match state.jobs.get_mut(job_id) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().copied(),
            None => None,
        };
        Ok(Some(status.unwrap_or(JobStatus::Finished)))
    }

    async fn unorganized_scenes(&self) -> Result<Vec<String>, ClientError> {
        self.take_error().await?;
        Ok(self.state.read().await.unorganized.iter().cloned().collect())
    }

    async fn identify_scenes(&self, scene_ids: &[String]) -> Result<String, ClientError> {
        self.take_error().await?;
        let mut state = self.state.write().await;
        if let Some(e) = &state.identify_error {
            return Err(e.clone());
        }
        state.identify_calls.push(scene_ids.to_vec());
        for id in scene_ids {
            if state.identifiable.contains(id) {
                state.unorganized.remove(id);
            }
        }
        Ok(state.next_job())
    }

    async fn generate_metadata(&self) -> Result<String, ClientError> {
        self.take_error().await?;
        let mut state = self.state.write().await;
        state.generate_calls += 1;
        Ok(state.next_job())
    }
}

impl MockCatalogState {
    fn next_job(&mut self) -> String {
        self.job_counter += 1;
        format!("mock-job-{}", self.job_counter)
    }
}
