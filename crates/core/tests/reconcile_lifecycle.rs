//! Reconciliation lifecycle integration tests.
//!
//! These tests run the engine against mock services and an on-disk cache:
//! first run merges, a second run inside the TTL is a no-op, and an expired
//! entry is fetched again.

use std::sync::Arc;

use chrono::{Duration, NaiveDate, Utc};
use tempfile::TempDir;

use curator_core::{
    catalog::EntityKind,
    reconcile::ReconcileConfig,
    testing::{fixtures, MockAutomation, MockCatalog, MockProvider},
    CacheKey, Reconciler, SqliteSyncCache, SyncCache,
};

struct TestHarness {
    catalog: Arc<MockCatalog>,
    stashdb: Arc<MockProvider>,
    tpdb: Arc<MockProvider>,
    automation: Arc<MockAutomation>,
    cache_path: std::path::PathBuf,
    _temp_dir: TempDir,
}

impl TestHarness {
    fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        Self {
            catalog: Arc::new(MockCatalog::new()),
            stashdb: Arc::new(MockProvider::new("stashdb")),
            tpdb: Arc::new(MockProvider::new("tpdb")),
            automation: Arc::new(MockAutomation::new()),
            cache_path: temp_dir.path().join("cache.db"),
            _temp_dir: temp_dir,
        }
    }

    /// Reopens the cache each time, like separate process invocations.
    fn reconciler(&self) -> (Reconciler, Arc<SqliteSyncCache>) {
        let cache = Arc::new(
            SqliteSyncCache::new(&self.cache_path, 7 * 24 * 3600).expect("Failed to open cache"),
        );
        let reconciler = Reconciler::new(
            self.catalog.clone(),
            cache.clone(),
            ReconcileConfig::default().with_max_concurrent(2),
        )
        .with_provider(self.stashdb.clone())
        .with_provider(self.tpdb.clone())
        .with_automation(self.automation.clone())
        .with_page_size(10);
        (reconciler, cache)
    }

    async fn provider_calls(&self) -> u32 {
        self.stashdb.fetch_calls().await
            + self.stashdb.search_calls().await
            + self.tpdb.fetch_calls().await
            + self.tpdb.search_calls().await
    }
}

fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(y, m, d)
}

#[tokio::test]
async fn test_merge_then_idempotent_rerun() {
    let h = TestHarness::new();

    let mut scene = fixtures::scene("1", "Scene Title", date(2024, 1, 10));
    scene.fields.studio = Some("X".into());
    h.catalog.add_entity(scene).await;
    h.catalog
        .add_entity(fixtures::performer("10", "Jane Doe"))
        .await;

    let mut sdb_scene = fixtures::scene_record("sdb-1", "Scene Title", date(2024, 1, 10));
    sdb_scene.fields.studio = Some("Y".into());
    h.stashdb.add_record(sdb_scene).await;

    let mut sdb_performer = fixtures::performer_record("sdb-p", "Jane Doe");
    sdb_performer
        .cross_refs
        .insert("tpdb".into(), "jane-doe".into());
    h.stashdb.add_record(sdb_performer).await;
    h.tpdb
        .add_record(fixtures::performer_record("jane-doe", "Jane Doe"))
        .await;

    let (reconciler, _) = h.reconciler();
    let first = reconciler.run().await.unwrap();

    assert_eq!(first.entities_seen, 2);
    assert_eq!(first.updated, 2);
    assert!(first.failed.is_empty());

    let scene = h.catalog.entity(EntityKind::Scene, "1").await.unwrap();
    assert_eq!(scene.fields.studio.as_deref(), Some("X"));
    assert_eq!(
        scene.fields.details.as_deref(),
        Some("Synopsis of Scene Title")
    );
    assert_eq!(scene.external_ids.get("stashdb").unwrap(), "sdb-1");

    let performer = h.catalog.entity(EntityKind::Performer, "10").await.unwrap();
    assert_eq!(performer.external_ids.get("stashdb").unwrap(), "sdb-p");
    assert_eq!(performer.external_ids.get("tpdb").unwrap(), "jane-doe");

    let registered: Vec<_> = h
        .automation
        .updates()
        .await
        .into_iter()
        .map(|u| (u.provider, u.external_id))
        .collect();
    assert!(registered.contains(&("tpdb".to_string(), "jane-doe".to_string())));

    let calls = h.provider_calls().await;
    let updates = h.catalog.update_count().await;
    let pushes = h.automation.updates().await.len();

    let (reconciler, _) = h.reconciler();
    let second = reconciler.run().await.unwrap();

    assert_eq!(second.fresh, 2);
    assert_eq!(second.provider_fetches, 0);
    assert_eq!(h.provider_calls().await, calls);
    assert_eq!(h.catalog.update_count().await, updates);
    assert_eq!(h.automation.updates().await.len(), pushes);
}

#[tokio::test]
async fn test_expired_entry_is_fetched_again() {
    let h = TestHarness::new();
    h.catalog
        .add_entity(fixtures::scene("1", "Scene Title", date(2024, 1, 10)))
        .await;

    let (_, cache) = h.reconciler();
    let key = Reconciler::cache_key(EntityKind::Scene, "1");
    cache
        .put_at(&key, "old-digest", Utc::now() - Duration::days(8))
        .unwrap();
    drop(cache);

    let (reconciler, cache) = h.reconciler();
    let report = reconciler.run().await.unwrap();

    assert_eq!(report.fresh, 0);
    assert_eq!(report.unchanged, 1);
    assert!(h.stashdb.search_calls().await > 0);
    let digest = cache.get(&key).unwrap().unwrap();
    assert_ne!(digest, "old-digest");
}

#[tokio::test]
async fn test_ambiguous_candidates_never_guessed() {
    let h = TestHarness::new();
    h.catalog
        .add_entity(fixtures::scene("1", "Scene Title", date(2024, 1, 10)))
        .await;
    h.stashdb
        .add_record(fixtures::scene_record("a", "Scene Title", date(2024, 1, 10)))
        .await;
    h.stashdb
        .add_record(fixtures::scene_record("b", "Scene-Title", date(2024, 1, 9)))
        .await;
    h.tpdb
        .add_record(fixtures::scene_record("t", "Scene Title", date(2024, 3, 1)))
        .await;

    let (reconciler, _) = h.reconciler();
    let report = reconciler.run().await.unwrap();

    assert_eq!(report.ambiguous.len(), 1);
    let mut candidates = report.ambiguous[0].candidates.clone();
    candidates.sort();
    assert_eq!(candidates, vec!["a", "b"]);

    // tpdb's only candidate is outside the date tolerance.
    assert_eq!(h.catalog.update_count().await, 0);
    let scene = h.catalog.entity(EntityKind::Scene, "1").await.unwrap();
    assert!(scene.external_ids.is_empty());
}

#[tokio::test]
async fn test_reset_forces_refetch() {
    let h = TestHarness::new();
    h.catalog
        .add_entity(fixtures::scene("1", "Scene Title", date(2024, 1, 10)))
        .await;

    let (reconciler, cache) = h.reconciler();
    reconciler.run().await.unwrap();
    assert_eq!(cache.reset().unwrap(), 1);

    let before = h.provider_calls().await;
    let (reconciler, _) = h.reconciler();
    let report = reconciler.run().await.unwrap();
    assert_eq!(report.fresh, 0);
    assert!(h.provider_calls().await > before);

    assert!(CacheKey::new("catalog", "scene:1").to_string().contains("scene:1"));
}
