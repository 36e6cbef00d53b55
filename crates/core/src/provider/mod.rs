//! External, read-only metadata providers.

mod stashbox;
mod tpdb;

pub use stashbox::{StashBoxClient, StashBoxConfig};
pub use tpdb::{TpdbClient, TpdbConfig};

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::catalog::{EntityFields, EntityKind};
use crate::client::ClientError;

/// A record as returned by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProviderRecord {
    /// Identifier within the provider.
    pub id: String,
    pub kind: EntityKind,
    pub fields: EntityFields,
    /// Identifiers of the same entity in other providers, keyed by
    /// provider name.
    pub cross_refs: BTreeMap<String, String>,
}

impl ProviderRecord {
    pub fn new(kind: EntityKind, id: impl Into<String>, fields: EntityFields) -> Self {
        Self {
            id: id.into(),
            kind,
            fields,
            cross_refs: BTreeMap::new(),
        }
    }
}

/// A metadata source the reconciler can consult.
#[async_trait]
pub trait MetadataProvider: Send + Sync {
    /// Provider name, used as the key for external identifiers.
    fn name(&self) -> &str;

    /// Fetch a record by its identifier. `Ok(None)` when the provider has
    /// no such record.
    async fn fetch(&self, kind: EntityKind, id: &str)
        -> Result<Option<ProviderRecord>, ClientError>;

    /// Free-text search; matching is left to the caller.
    async fn search(&self, kind: EntityKind, term: &str)
        -> Result<Vec<ProviderRecord>, ClientError>;
}

/// Last path segment of a URL, used to pull identifiers out of links.
pub(crate) fn last_path_segment(url: &str) -> Option<String> {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    without_query
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.contains(':'))
        .map(|s| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_path_segment() {
        assert_eq!(
            last_path_segment("https://theporndb.net/performers/jane-doe").as_deref(),
            Some("jane-doe")
        );
        assert_eq!(
            last_path_segment("https://theporndb.net/performers/jane-doe/?tab=scenes").as_deref(),
            Some("jane-doe")
        );
        assert_eq!(last_path_segment("https://"), None);
        assert_eq!(last_path_segment(""), None);
    }
}
