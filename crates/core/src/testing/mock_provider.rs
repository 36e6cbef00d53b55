//! Mock metadata provider for testing.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::catalog::EntityKind;
use crate::client::ClientError;
use crate::provider::{MetadataProvider, ProviderRecord};
use crate::reconcile::normalize_title;

#[derive(Debug, Default)]
struct MockProviderState {
    records: Vec<ProviderRecord>,
    fetch_calls: u32,
    search_calls: u32,
    fetch_error: Option<ClientError>,
    search_error: Option<ClientError>,
}

/// Mock implementation of the MetadataProvider trait.
///
/// `fetch` looks records up by id; `search` returns every record of the
/// kind whose normalized title contains the normalized term.
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    state: Arc<RwLock<MockProviderState>>,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(RwLock::new(MockProviderState::default())),
        }
    }

    pub async fn add_record(&self, record: ProviderRecord) {
        self.state.write().await.records.push(record);
    }

    pub async fn fetch_calls(&self) -> u32 {
        self.state.read().await.fetch_calls
    }

    pub async fn search_calls(&self) -> u32 {
        self.state.read().await.search_calls
    }

    /// Fail every fetch with `error`.
    pub async fn set_fetch_error(&self, error: ClientError) {
        self.state.write().await.fetch_error = Some(error);
    }

    /// Fail every search with `error`.
    pub async fn set_search_error(&self, error: ClientError) {
        self.state.write().await.search_error = Some(error);
    }
}

#[async_trait]
impl MetadataProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> Result<Option<ProviderRecord>, ClientError> {
        let mut state = self.state.write().await;
        state.fetch_calls += 1;
        if let Some(e) = &state.fetch_error {
            return Err(e.clone());
        }
        Ok(state
            .records
            .iter()
            .find(|r| r.kind == kind && r.id == id)
            .cloned())
    }

    async fn search(
        &self,
        kind: EntityKind,
        term: &str,
    ) -> Result<Vec<ProviderRecord>, ClientError> {
        let mut state = self.state.write().await;
        state.search_calls += 1;
        if let Some(e) = &state.search_error {
            return Err(e.clone());
        }
        let wanted = normalize_title(term);
        Ok(state
            .records
            .iter()
            .filter(|r| r.kind == kind)
            .filter(|r| {
                r.fields
                    .title
                    .as_deref()
                    .is_some_and(|t| normalize_title(t).contains(&wanted))
            })
            .cloned()
            .collect())
    }
}
