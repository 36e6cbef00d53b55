//! Local catalog service (the system of record for media metadata).

mod health;
mod stash;
mod types;

pub use health::{wait_for_job, wait_until_healthy};
pub use stash::{StashClient, StashConfig};
pub use types::*;

use async_trait::async_trait;

use crate::client::ClientError;

/// Operations the reconciler and watcher need from the catalog.
#[async_trait]
pub trait CatalogService: Send + Sync {
    /// Whether the catalog is up and ready to serve requests.
    async fn health(&self) -> Result<bool, ClientError>;

    /// One page of entities of `kind`, in stable id order. Pages are 1-based.
    async fn list_entities(
        &self,
        kind: EntityKind,
        page: u32,
        per_page: u32,
    ) -> Result<EntityPage, ClientError>;

    /// Apply a patch to one entity.
    async fn update_entity(&self, update: &EntityUpdate) -> Result<(), ClientError>;

    /// Ask the catalog to scan `paths` for new media. Returns the job id.
    async fn trigger_scan(&self, paths: &[String]) -> Result<String, ClientError>;

    /// Current state of a background job, or `None` once the catalog no
    /// longer knows it.
    async fn job_status(&self, job_id: &str) -> Result<Option<JobStatus>, ClientError>;

    /// Ids of every scene not yet marked organized.
    async fn unorganized_scenes(&self) -> Result<Vec<String>, ClientError>;

    /// Identify `scene_ids` against the configured stash-boxes. Returns the
    /// job id.
    async fn identify_scenes(&self, scene_ids: &[String]) -> Result<String, ClientError>;

    /// Generate previews, sprites and fingerprints for media that lacks
    /// them. Returns the job id.
    async fn generate_metadata(&self) -> Result<String, ClientError>;
}
