//! Testing utilities and mock implementations.
//!
//! Mocks for every external service trait, so the reconciler and the
//! watcher can be exercised without a catalog, providers or automation.
//!
//! # Example
//!
//! ```rust,ignore
//! use curator_core::testing::{fixtures, MockCatalog, MockProvider};
//!
//! let catalog = MockCatalog::new();
//! let stashdb = MockProvider::new("stashdb");
//!
//! catalog.add_entity(fixtures::scene("1", "Scene Title", None)).await;
//! stashdb.add_record(fixtures::scene_record("sdb-1", "Scene Title", None)).await;
//! ```

mod mock_automation;
mod mock_catalog;
mod mock_provider;

pub use mock_automation::MockAutomation;
pub use mock_catalog::MockCatalog;
pub use mock_provider::MockProvider;

/// Test fixtures and helper functions.
pub mod fixtures {
    use chrono::NaiveDate;

    use crate::catalog::{CatalogEntity, EntityFields, EntityKind};
    use crate::provider::ProviderRecord;

    /// A catalog scene with only a title and optional date.
    pub fn scene(id: &str, title: &str, date: Option<NaiveDate>) -> CatalogEntity {
        let mut entity = CatalogEntity::new(EntityKind::Scene, id);
        entity.fields.title = Some(title.to_string());
        entity.fields.date = date;
        entity
    }

    /// A catalog performer with only a name.
    pub fn performer(id: &str, name: &str) -> CatalogEntity {
        let mut entity = CatalogEntity::new(EntityKind::Performer, id);
        entity.fields.title = Some(name.to_string());
        entity
    }

    /// A provider scene carrying a synopsis and a studio.
    pub fn scene_record(id: &str, title: &str, date: Option<NaiveDate>) -> ProviderRecord {
        ProviderRecord::new(
            EntityKind::Scene,
            id,
            EntityFields {
                title: Some(title.to_string()),
                date,
                details: Some(format!("Synopsis of {}", title)),
                studio: Some("Studio Y".to_string()),
                ..Default::default()
            },
        )
    }

    /// A provider performer carrying a bio.
    pub fn performer_record(id: &str, name: &str) -> ProviderRecord {
        ProviderRecord::new(
            EntityKind::Performer,
            id,
            EntityFields {
                title: Some(name.to_string()),
                details: Some(format!("Bio of {}", name)),
                ..Default::default()
            },
        )
    }
}
