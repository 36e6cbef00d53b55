//! Configuration for the reconciliation engine.

use serde::{Deserialize, Serialize};

use crate::catalog::EntityKind;

/// Reconciliation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileConfig {
    /// Entities processed concurrently within a page.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Maximum distance in days between dates for a fallback match.
    #[serde(default = "default_date_tolerance")]
    pub date_tolerance_days: i64,

    /// Kinds enumerated each run, in order.
    #[serde(default = "default_entity_kinds")]
    pub entity_kinds: Vec<EntityKind>,
}

fn default_max_concurrent() -> usize {
    4
}

fn default_date_tolerance() -> i64 {
    1
}

fn default_entity_kinds() -> Vec<EntityKind> {
    EntityKind::all().to_vec()
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            date_tolerance_days: default_date_tolerance(),
            entity_kinds: default_entity_kinds(),
        }
    }
}

impl ReconcileConfig {
    /// Sets the concurrency limit.
    pub fn with_max_concurrent(mut self, max: usize) -> Self {
        self.max_concurrent = max;
        self
    }

    /// Sets the entity kinds to enumerate.
    pub fn with_entity_kinds(mut self, kinds: Vec<EntityKind>) -> Self {
        self.entity_kinds = kinds;
        self
    }
}
