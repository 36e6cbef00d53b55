//! Types for the reconcile module.

use serde::Serialize;
use thiserror::Error;

use crate::catalog::EntityKind;
use crate::client::ClientError;
use crate::sync_cache::CacheError;

/// Errors that end a reconciliation run.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The catalog could not be enumerated.
    #[error("failed to enumerate {kind} entities: {source}")]
    Enumeration {
        kind: EntityKind,
        #[source]
        source: ClientError,
    },

    /// A service refused our credentials.
    #[error("aborting run: {0}")]
    Unauthorized(#[source] ClientError),

    /// The identifier cache failed.
    #[error("sync cache error: {0}")]
    Cache(#[from] CacheError),
}

/// Per-entity status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityStatus {
    /// Cache entry still fresh; nothing fetched.
    Fresh,
    /// The catalog was (or in dry-run, would be) updated.
    Updated,
    /// Providers consulted, nothing to change.
    Unchanged,
}

/// A search that produced several passing candidates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AmbiguousMatch {
    pub kind: EntityKind,
    pub entity_id: String,
    pub provider: String,
    pub candidates: Vec<String>,
}

/// An entity whose processing failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedEntity {
    pub kind: EntityKind,
    pub entity_id: String,
    pub reason: String,
}

/// Outcome of processing one entity.
#[derive(Debug, Clone)]
pub struct EntityReport {
    pub kind: EntityKind,
    pub id: String,
    pub status: EntityStatus,
    pub provider_fetches: u64,
    pub registrations: u64,
    pub ambiguous: Vec<AmbiguousMatch>,
    /// Provider, catalog write or automation failures.
    pub failures: Vec<String>,
}

impl EntityReport {
    pub(crate) fn new(kind: EntityKind, id: &str, status: EntityStatus) -> Self {
        Self {
            kind,
            id: id.to_string(),
            status,
            provider_fetches: 0,
            registrations: 0,
            ambiguous: Vec::new(),
            failures: Vec::new(),
        }
    }
}

/// Summary of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub entities_seen: u64,
    pub fresh: u64,
    pub updated: u64,
    pub unchanged: u64,
    /// Duplicates skipped after pagination drift.
    pub duplicates: u64,
    pub provider_fetches: u64,
    pub registrations: u64,
    pub ambiguous: Vec<AmbiguousMatch>,
    pub failed: Vec<FailedEntity>,
    pub dry_run: bool,
}

impl RunReport {
    pub(crate) fn record(&mut self, entity: EntityReport) {
        self.entities_seen += 1;
        match entity.status {
            EntityStatus::Fresh => self.fresh += 1,
            EntityStatus::Updated => self.updated += 1,
            EntityStatus::Unchanged => self.unchanged += 1,
        }
        self.provider_fetches += entity.provider_fetches;
        self.registrations += entity.registrations;
        self.ambiguous.extend(entity.ambiguous);
        if !entity.failures.is_empty() {
            self.failed.push(FailedEntity {
                kind: entity.kind,
                entity_id: entity.id,
                reason: entity.failures.join("; "),
            });
        }
    }
}
