//! Download automation. Newly resolved identifiers are forwarded here so
//! the automation service starts tracking the entity.

mod whisparr;

pub use whisparr::{WhisparrClient, WhisparrConfig};

use async_trait::async_trait;
use serde::Serialize;

use crate::catalog::EntityKind;
use crate::client::ClientError;

/// A newly resolved external identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutomationUpdate {
    pub kind: EntityKind,
    /// Provider the identifier belongs to.
    pub provider: String,
    pub external_id: String,
    /// Display name of the entity, if known.
    pub name: Option<String>,
}

/// Result of forwarding an identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PushOutcome {
    /// The service now tracks the entity.
    Registered,
    /// The service already tracked it; nothing was changed.
    AlreadyPresent,
    /// The service does not track this kind of identifier.
    NotTracked,
}

/// A download-automation service.
#[async_trait]
pub trait DownloadAutomation: Send + Sync {
    fn name(&self) -> &str;

    /// Make the service aware of `update`. Must be idempotent.
    async fn register_identifier(
        &self,
        update: &AutomationUpdate,
    ) -> Result<PushOutcome, ClientError>;
}
