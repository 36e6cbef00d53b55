//! Reconciliation engine.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, info, warn};

use super::config::ReconcileConfig;
use super::matcher::{select_candidate, MatchResult};
use super::merge::{digest, fill_empty, merge_id};
use super::types::{AmbiguousMatch, EntityReport, EntityStatus, ReconcileError, RunReport};
use crate::automation::{AutomationUpdate, DownloadAutomation, PushOutcome};
use crate::catalog::{
    compare_ids, CatalogEntity, CatalogService, EntityFields, EntityKind, EntityUpdate,
};
use crate::client::ClientError;
use crate::metrics;
use crate::provider::{MetadataProvider, ProviderRecord};
use crate::sync_cache::{CacheKey, SyncCache};

/// Cache namespace for whole-entity sync records.
const CACHE_PROVIDER: &str = "catalog";

/// Reconciles catalog entities against external providers.
///
/// Runs to completion: every configured kind is enumerated page by page,
/// and entities within a page are processed concurrently.
pub struct Reconciler {
    catalog: Arc<dyn CatalogService>,
    cache: Arc<dyn SyncCache>,
    providers: Vec<Arc<dyn MetadataProvider>>,
    automation: Option<Arc<dyn DownloadAutomation>>,
    config: ReconcileConfig,
    page_size: u32,
    dry_run: bool,
}

impl Reconciler {
    pub fn new(
        catalog: Arc<dyn CatalogService>,
        cache: Arc<dyn SyncCache>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            catalog,
            cache,
            providers: Vec::new(),
            automation: None,
            config,
            page_size: 100,
            dry_run: false,
        }
    }

    /// Add a provider. Providers are consulted in the order they are added.
    pub fn with_provider(mut self, provider: Arc<dyn MetadataProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn with_automation(mut self, automation: Arc<dyn DownloadAutomation>) -> Self {
        self.automation = Some(automation);
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Compute merges without writing to the catalog, automation or cache.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Cache key for an entity.
    pub fn cache_key(kind: EntityKind, id: &str) -> CacheKey {
        CacheKey::new(CACHE_PROVIDER, format!("{}:{}", kind, id))
    }

    /// Run once over every configured kind.
    pub async fn run(&self) -> Result<RunReport, ReconcileError> {
        let mut report = RunReport {
            dry_run: self.dry_run,
            ..Default::default()
        };

        info!(
            kinds = ?self.config.entity_kinds,
            providers = self.providers.len(),
            dry_run = self.dry_run,
            "Starting reconciliation run"
        );

        for kind in &self.config.entity_kinds {
            self.reconcile_kind(*kind, &mut report).await?;
        }

        info!(
            seen = report.entities_seen,
            fresh = report.fresh,
            updated = report.updated,
            unchanged = report.unchanged,
            fetches = report.provider_fetches,
            ambiguous = report.ambiguous.len(),
            failed = report.failed.len(),
            "Reconciliation run finished"
        );
        Ok(report)
    }

    async fn reconcile_kind(
        &self,
        kind: EntityKind,
        report: &mut RunReport,
    ) -> Result<(), ReconcileError> {
        // Pages come back in ascending id order, so anything at or below
        // the last id was already handled.
        let mut last_id: Option<String> = None;
        let mut page = 1u32;

        loop {
            let batch = self
                .catalog
                .list_entities(kind, page, self.page_size)
                .await
                .map_err(|e| {
                    if e.is_fatal() {
                        ReconcileError::Unauthorized(e)
                    } else {
                        ReconcileError::Enumeration { kind, source: e }
                    }
                })?;

            let fetched = batch.entities.len();
            debug!(%kind, page, fetched, total = batch.total, "Fetched catalog page");
            if fetched == 0 {
                break;
            }

            let mut entities = Vec::with_capacity(fetched);
            for entity in batch.entities {
                let fresh = last_id
                    .as_deref()
                    .is_none_or(|last| compare_ids(&entity.id, last) == Ordering::Greater);
                if fresh {
                    last_id = Some(entity.id.clone());
                    entities.push(entity);
                } else {
                    debug!(%kind, id = %entity.id, "Skipping entity already seen this run");
                    report.duplicates += 1;
                }
            }

            let mut results = stream::iter(entities)
                .map(|entity| self.reconcile_entity(entity))
                .buffer_unordered(self.config.max_concurrent.max(1));

            while let Some(result) = results.next().await {
                // Dropping the stream on error cancels in-flight workers.
                report.record(result?);
            }

            if fetched < self.page_size as usize
                || u64::from(page) * u64::from(self.page_size) >= batch.total
            {
                break;
            }
            page += 1;
        }
        Ok(())
    }

    /// Process a single entity. Only fatal conditions are returned as errors.
    pub async fn reconcile_entity(
        &self,
        entity: CatalogEntity,
    ) -> Result<EntityReport, ReconcileError> {
        let kind = entity.kind;
        let key = Self::cache_key(kind, &entity.id);

        if self.cache.get(&key)?.is_some() {
            metrics::CACHE_LOOKUPS.with_label_values(&["hit"]).inc();
            metrics::ENTITIES_RECONCILED
                .with_label_values(&[kind.as_str(), "fresh"])
                .inc();
            return Ok(EntityReport::new(kind, &entity.id, EntityStatus::Fresh));
        }
        metrics::CACHE_LOOKUPS.with_label_values(&["miss"]).inc();

        let mut report = EntityReport::new(kind, &entity.id, EntityStatus::Unchanged);
        let mut merged = entity.fields.clone();
        let mut ids = entity.external_ids.clone();
        let mut patch = EntityFields::default();
        let mut new_ids: Vec<(String, String)> = Vec::new();
        let mut cross_refs: BTreeMap<String, String> = BTreeMap::new();
        let mut fetch_failed = false;

        for provider in &self.providers {
            let name = provider.name();
            let resolved = self
                .resolve(provider.as_ref(), &entity, &ids, &cross_refs, &mut report)
                .await;

            let record = match resolved {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) if e.is_fatal() => return Err(ReconcileError::Unauthorized(e)),
                Err(e) => {
                    warn!(provider = name, %kind, id = %entity.id, error = %e, "Provider lookup failed");
                    report.failures.push(e.to_string());
                    fetch_failed = true;
                    continue;
                }
            };

            for (other, id) in &record.cross_refs {
                cross_refs.entry(other.clone()).or_insert_with(|| id.clone());
            }
            if merge_id(&mut ids, name, &record.id) {
                new_ids.push((name.to_string(), record.id.clone()));
            }
            fill_empty(&mut merged, &record.fields, &mut patch);
        }

        let changed = !patch.is_empty() || !new_ids.is_empty();
        let mut write_failed = false;

        if changed {
            report.status = EntityStatus::Updated;
            if self.dry_run {
                info!(%kind, id = %entity.id, patch = ?patch, new_ids = ?new_ids, "Dry run: would update entity");
            } else {
                let update = EntityUpdate {
                    id: entity.id.clone(),
                    kind,
                    external_ids: ids.clone(),
                    fields: patch,
                };
                match self.catalog.update_entity(&update).await {
                    Ok(()) => {
                        info!(%kind, id = %entity.id, new_ids = new_ids.len(), "Catalog entity updated");
                        self.notify_automation(kind, &merged, &new_ids, &mut report)
                            .await?;
                    }
                    Err(e) if e.is_fatal() => return Err(ReconcileError::Unauthorized(e)),
                    Err(e) => {
                        warn!(%kind, id = %entity.id, error = %e, "Catalog update failed");
                        report.failures.push(e.to_string());
                        report.status = EntityStatus::Unchanged;
                        write_failed = true;
                    }
                }
            }
        }

        if !self.dry_run && !fetch_failed && !write_failed {
            self.cache.put(&key, &digest(&ids, &merged))?;
        }

        let outcome = if !report.failures.is_empty() {
            "failed"
        } else if report.status == EntityStatus::Updated {
            "updated"
        } else {
            "unchanged"
        };
        metrics::ENTITIES_RECONCILED
            .with_label_values(&[kind.as_str(), outcome])
            .inc();

        Ok(report)
    }

    /// Resolve the provider's record for `entity`: exact identifier first
    /// (own or cross-referenced), search plus fallback matching otherwise.
    async fn resolve(
        &self,
        provider: &dyn MetadataProvider,
        entity: &CatalogEntity,
        ids: &BTreeMap<String, String>,
        cross_refs: &BTreeMap<String, String>,
        report: &mut EntityReport,
    ) -> Result<Option<ProviderRecord>, ClientError> {
        let name = provider.name();
        let known_id = ids
            .get(name)
            .filter(|id| !id.is_empty())
            .or_else(|| cross_refs.get(name));

        if let Some(id) = known_id {
            report.provider_fetches += 1;
            let result = provider.fetch(entity.kind, id).await;
            record_fetch(name, &result.as_ref().map(|r| r.is_some()));
            if let Ok(None) = result {
                debug!(provider = name, kind = %entity.kind, external_id = %id, "Identifier unknown to provider");
            }
            return result;
        }

        let Some(term) = entity.fields.title.as_deref().filter(|t| !t.trim().is_empty()) else {
            return Ok(None);
        };

        report.provider_fetches += 1;
        let result = provider.search(entity.kind, term).await;
        record_fetch(name, &result.as_ref().map(|r| !r.is_empty()));
        let candidates = result?;

        match select_candidate(entity, candidates, self.config.date_tolerance_days) {
            MatchResult::Matched(record) => {
                debug!(provider = name, kind = %entity.kind, id = %entity.id, matched = %record.id, "Fallback match");
                Ok(Some(record))
            }
            MatchResult::NoMatch => Ok(None),
            MatchResult::Ambiguous(candidates) => {
                warn!(
                    provider = name,
                    kind = %entity.kind,
                    id = %entity.id,
                    candidates = ?candidates,
                    "Ambiguous match, skipping"
                );
                metrics::AMBIGUOUS_MATCHES.with_label_values(&[name]).inc();
                report.ambiguous.push(AmbiguousMatch {
                    kind: entity.kind,
                    entity_id: entity.id.clone(),
                    provider: name.to_string(),
                    candidates,
                });
                Ok(None)
            }
        }
    }

    async fn notify_automation(
        &self,
        kind: EntityKind,
        merged: &EntityFields,
        new_ids: &[(String, String)],
        report: &mut EntityReport,
    ) -> Result<(), ReconcileError> {
        let Some(automation) = &self.automation else {
            return Ok(());
        };

        for (provider, external_id) in new_ids {
            let update = AutomationUpdate {
                kind,
                provider: provider.clone(),
                external_id: external_id.clone(),
                name: merged.title.clone(),
            };
            match automation.register_identifier(&update).await {
                Ok(outcome) => {
                    let label = match outcome {
                        PushOutcome::Registered => {
                            report.registrations += 1;
                            "registered"
                        }
                        PushOutcome::AlreadyPresent => "already_present",
                        PushOutcome::NotTracked => "not_tracked",
                    };
                    metrics::AUTOMATION_PUSHES.with_label_values(&[label]).inc();
                }
                Err(e) if e.is_fatal() => return Err(ReconcileError::Unauthorized(e)),
                Err(e) => {
                    metrics::AUTOMATION_PUSHES.with_label_values(&["error"]).inc();
                    warn!(
                        service = automation.name(),
                        provider = %provider,
                        external_id = %external_id,
                        error = %e,
                        "Download automation registration failed"
                    );
                }
            }
        }
        Ok(())
    }
}

fn record_fetch(provider: &str, result: &Result<bool, &ClientError>) {
    let label = match result {
        Ok(true) => "found",
        Ok(false) => "not_found",
        Err(_) => "error",
    };
    metrics::PROVIDER_FETCHES
        .with_label_values(&[provider, label])
        .inc();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync_cache::SqliteSyncCache;
    use crate::testing::{fixtures, MockAutomation, MockCatalog, MockProvider};
    use chrono::NaiveDate;

    struct Harness {
        catalog: Arc<MockCatalog>,
        cache: Arc<SqliteSyncCache>,
        stashdb: Arc<MockProvider>,
        tpdb: Arc<MockProvider>,
        automation: Arc<MockAutomation>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                catalog: Arc::new(MockCatalog::new()),
                cache: Arc::new(SqliteSyncCache::in_memory(3600).unwrap()),
                stashdb: Arc::new(MockProvider::new("stashdb")),
                tpdb: Arc::new(MockProvider::new("tpdb")),
                automation: Arc::new(MockAutomation::new()),
            }
        }

        fn reconciler(&self) -> Reconciler {
            Reconciler::new(
                self.catalog.clone(),
                self.cache.clone(),
                ReconcileConfig::default().with_entity_kinds(vec![
                    EntityKind::Scene,
                    EntityKind::Performer,
                ]),
            )
            .with_provider(self.stashdb.clone())
            .with_provider(self.tpdb.clone())
            .with_automation(self.automation.clone())
            .with_page_size(2)
        }
    }

    #[tokio::test]
    async fn test_exact_id_fills_empty_fields() {
        let h = Harness::new();
        let mut entity = fixtures::scene("1", "Scene Title", NaiveDate::from_ymd_opt(2024, 1, 10));
        entity.external_ids.insert("stashdb".into(), "sdb-1".into());
        entity.fields.studio = Some("X".into());
        h.catalog.add_entity(entity).await;

        let mut record = fixtures::scene_record("sdb-1", "Scene Title", NaiveDate::from_ymd_opt(2024, 1, 10));
        record.fields.studio = Some("Y".into());
        record.fields.details = Some("Synopsis".into());
        h.stashdb.add_record(record).await;

        let report = h.reconciler().run().await.unwrap();

        assert_eq!(report.updated, 1);
        let stored = h.catalog.entity(EntityKind::Scene, "1").await.unwrap();
        assert_eq!(stored.fields.studio.as_deref(), Some("X"));
        assert_eq!(stored.fields.details.as_deref(), Some("Synopsis"));
        assert_eq!(h.stashdb.fetch_calls().await, 1);
        assert_eq!(h.stashdb.search_calls().await, 0);
    }

    #[tokio::test]
    async fn test_cross_ref_used_for_later_provider() {
        let h = Harness::new();
        let mut performer = fixtures::performer("7", "Jane Doe");
        performer.external_ids.insert("stashdb".into(), "sdb-p".into());
        h.catalog.add_entity(performer).await;

        let mut record = fixtures::performer_record("sdb-p", "Jane Doe");
        record.cross_refs.insert("tpdb".into(), "jane-doe".into());
        h.stashdb.add_record(record).await;
        h.tpdb
            .add_record(fixtures::performer_record("jane-doe", "Jane Doe"))
            .await;

        let report = h.reconciler().run().await.unwrap();

        assert_eq!(report.updated, 1);
        assert_eq!(report.registrations, 1);
        let stored = h.catalog.entity(EntityKind::Performer, "7").await.unwrap();
        assert_eq!(stored.external_ids.get("tpdb").unwrap(), "jane-doe");
        assert_eq!(h.tpdb.search_calls().await, 0);

        let pushed = h.automation.updates().await;
        assert_eq!(pushed.len(), 1);
        assert_eq!(pushed[0].provider, "tpdb");
        assert_eq!(pushed[0].name.as_deref(), Some("Jane Doe"));
    }

    #[tokio::test]
    async fn test_second_run_is_idempotent() {
        let h = Harness::new();
        h.catalog
            .add_entity(fixtures::scene("1", "Scene Title", NaiveDate::from_ymd_opt(2024, 1, 10)))
            .await;
        h.stashdb
            .add_record(fixtures::scene_record("sdb-1", "Scene Title", NaiveDate::from_ymd_opt(2024, 1, 10)))
            .await;

        let first = h.reconciler().run().await.unwrap();
        assert_eq!(first.updated, 1);
        let after_first = h.catalog.entity(EntityKind::Scene, "1").await.unwrap();
        let fetches = h.stashdb.fetch_calls().await + h.stashdb.search_calls().await;
        let updates = h.catalog.update_count().await;

        let second = h.reconciler().run().await.unwrap();
        assert_eq!(second.fresh, 1);
        assert_eq!(second.provider_fetches, 0);
        assert_eq!(
            h.stashdb.fetch_calls().await + h.stashdb.search_calls().await,
            fetches
        );
        assert_eq!(h.catalog.update_count().await, updates);
        assert_eq!(
            h.catalog.entity(EntityKind::Scene, "1").await.unwrap(),
            after_first
        );
    }

    #[tokio::test]
    async fn test_ambiguous_match_updates_nothing_but_caches() {
        let h = Harness::new();
        h.catalog
            .add_entity(fixtures::scene("1", "Scene Title", NaiveDate::from_ymd_opt(2024, 1, 10)))
            .await;
        h.stashdb
            .add_record(fixtures::scene_record("a", "Scene Title", NaiveDate::from_ymd_opt(2024, 1, 10)))
            .await;
        h.stashdb
            .add_record(fixtures::scene_record("b", "scene title", NaiveDate::from_ymd_opt(2024, 1, 11)))
            .await;

        let report = h.reconciler().run().await.unwrap();

        assert_eq!(report.ambiguous.len(), 1);
        assert_eq!(report.ambiguous[0].provider, "stashdb");
        assert_eq!(report.unchanged, 1);
        assert_eq!(h.catalog.update_count().await, 0);
        assert!(h
            .cache
            .get(&Reconciler::cache_key(EntityKind::Scene, "1"))
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_provider_failure_is_isolated_and_not_cached() {
        let h = Harness::new();
        let mut entity = fixtures::scene("1", "Scene Title", NaiveDate::from_ymd_opt(2024, 1, 10));
        entity.external_ids.insert("stashdb".into(), "sdb-1".into());
        h.catalog.add_entity(entity).await;
        h.catalog
            .add_entity(fixtures::scene("2", "Other", NaiveDate::from_ymd_opt(2024, 1, 10)))
            .await;
        h.stashdb
            .set_fetch_error(ClientError::unavailable("stashdb", "down"))
            .await;

        let report = h.reconciler().run().await.unwrap();

        assert_eq!(report.entities_seen, 2);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].entity_id, "1");
        assert!(h
            .cache
            .get(&Reconciler::cache_key(EntityKind::Scene, "1"))
            .unwrap()
            .is_none());
        assert!(h
            .cache
            .get(&Reconciler::cache_key(EntityKind::Scene, "2"))
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_catalog_write_failure_is_not_cached() {
        let h = Harness::new();
        h.catalog
            .add_entity(fixtures::scene("1", "Scene Title", NaiveDate::from_ymd_opt(2024, 1, 10)))
            .await;
        h.stashdb
            .add_record(fixtures::scene_record("sdb-1", "Scene Title", NaiveDate::from_ymd_opt(2024, 1, 10)))
            .await;
        h.catalog
            .set_update_error(ClientError::Rejected {
                service: "stash".into(),
                status: 422,
                message: "invalid".into(),
            })
            .await;

        let report = h.reconciler().run().await.unwrap();

        assert_eq!(report.failed.len(), 1);
        assert!(h.automation.updates().await.is_empty());
        assert!(h
            .cache
            .get(&Reconciler::cache_key(EntityKind::Scene, "1"))
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unauthorized_aborts_run() {
        let h = Harness::new();
        let mut entity = fixtures::scene("1", "Scene Title", NaiveDate::from_ymd_opt(2024, 1, 10));
        entity.external_ids.insert("stashdb".into(), "sdb-1".into());
        h.catalog.add_entity(entity).await;
        h.stashdb
            .set_fetch_error(ClientError::unauthorized("stashdb", "bad key"))
            .await;

        let result = h.reconciler().run().await;
        assert!(matches!(result, Err(ReconcileError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_enumeration_failure_is_fatal() {
        let h = Harness::new();
        h.catalog
            .set_list_error(ClientError::unavailable("stash", "down"))
            .await;

        let result = h.reconciler().run().await;
        assert!(matches!(
            result,
            Err(ReconcileError::Enumeration {
                kind: EntityKind::Scene,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_pagination_and_duplicates() {
        let h = Harness::new();
        for id in ["1", "2", "3", "4", "5"] {
            h.catalog
                .add_entity(fixtures::scene(id, &format!("Scene {}", id), None))
                .await;
        }
        h.catalog.duplicate_on_page(2, "2").await;

        let report = h.reconciler().run().await.unwrap();

        assert_eq!(report.entities_seen, 5);
        assert_eq!(report.duplicates, 1);
        assert_eq!(h.catalog.pages_requested(EntityKind::Scene).await, 3);
    }

    #[tokio::test]
    async fn test_numeric_ids_across_pages() {
        let h = Harness::new();
        for id in ["2", "9", "10", "11"] {
            h.catalog
                .add_entity(fixtures::scene(id, &format!("Scene {}", id), None))
                .await;
        }
        // Page two starts with 9 again; 10 and 11 still sort after it.
        h.catalog.duplicate_on_page(2, "9").await;

        let report = h.reconciler().run().await.unwrap();

        assert_eq!(report.entities_seen, 4);
        assert_eq!(report.duplicates, 1);
    }

    #[tokio::test]
    async fn test_dry_run_writes_nothing() {
        let h = Harness::new();
        h.catalog
            .add_entity(fixtures::scene("1", "Scene Title", NaiveDate::from_ymd_opt(2024, 1, 10)))
            .await;
        h.stashdb
            .add_record(fixtures::scene_record("sdb-1", "Scene Title", NaiveDate::from_ymd_opt(2024, 1, 10)))
            .await;

        let report = h.reconciler().with_dry_run(true).run().await.unwrap();

        assert!(report.dry_run);
        assert_eq!(report.updated, 1);
        assert_eq!(h.catalog.update_count().await, 0);
        assert_eq!(h.cache.stats().unwrap().total_entries, 0);
    }
}
