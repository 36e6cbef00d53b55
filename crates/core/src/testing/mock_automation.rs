//! Mock download automation for testing.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::automation::{AutomationUpdate, DownloadAutomation, PushOutcome};
use crate::client::ClientError;

/// Mock implementation of the DownloadAutomation trait.
///
/// Records every update. The first registration of a provider/identifier
/// pair is `Registered`, repeats are `AlreadyPresent`.
#[derive(Debug, Default)]
pub struct MockAutomation {
    updates: Arc<RwLock<Vec<AutomationUpdate>>>,
    tracked: Arc<RwLock<HashSet<(String, String)>>>,
    /// If set, the next registration fails with this error.
    next_error: Arc<RwLock<Option<ClientError>>>,
}

impl MockAutomation {
    pub fn new() -> Self {
        Self::default()
    }

    /// All updates received, including failed ones.
    pub async fn updates(&self) -> Vec<AutomationUpdate> {
        self.updates.read().await.clone()
    }

    pub async fn set_next_error(&self, error: ClientError) {
        *self.next_error.write().await = Some(error);
    }
}

#[async_trait]
impl DownloadAutomation for MockAutomation {
    fn name(&self) -> &str {
        "mock-automation"
    }

    async fn register_identifier(
        &self,
        update: &AutomationUpdate,
    ) -> Result<PushOutcome, ClientError> {
        self.updates.write().await.push(update.clone());
        if let Some(e) = self.next_error.write().await.take() {
            return Err(e);
        }

        let key = (update.provider.clone(), update.external_id.clone());
        if self.tracked.write().await.insert(key) {
            Ok(PushOutcome::Registered)
        } else {
            Ok(PushOutcome::AlreadyPresent)
        }
    }
}
