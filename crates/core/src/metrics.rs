//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Provider and catalog traffic
//! - Identifier cache hits
//! - Reconciliation outcomes
//! - Watcher imports and scan triggers

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts};

// =============================================================================
// Reconciliation
// =============================================================================

/// Provider requests by provider and result.
pub static PROVIDER_FETCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "curator_provider_fetches_total",
            "Total metadata provider requests",
        ),
        &["provider", "result"], // "found", "not_found", "error"
    )
    .expect("provider fetch counter")
});

/// Identifier cache lookups by result.
pub static CACHE_LOOKUPS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("curator_cache_lookups_total", "Total sync cache lookups"),
        &["result"], // "hit", "miss"
    )
    .expect("cache lookup counter")
});

/// Reconciled entities by kind and outcome.
pub static ENTITIES_RECONCILED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "curator_entities_reconciled_total",
            "Total entities processed by the reconciler",
        ),
        &["kind", "outcome"], // "fresh", "updated", "unchanged", "failed"
    )
    .expect("reconciled entity counter")
});

/// Ambiguous matches by provider.
pub static AMBIGUOUS_MATCHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "curator_ambiguous_matches_total",
            "Searches that produced more than one passing candidate",
        ),
        &["provider"],
    )
    .expect("ambiguous match counter")
});

/// Download automation registrations by outcome.
pub static AUTOMATION_PUSHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "curator_automation_pushes_total",
            "Identifiers forwarded to download automation",
        ),
        &["outcome"], // "registered", "already_present", "not_tracked", "error"
    )
    .expect("automation push counter")
});

// =============================================================================
// Watcher
// =============================================================================

/// Imports by result.
pub static IMPORTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("curator_imports_total", "Total download imports"),
        &["result"], // "imported", "failed", "lock_conflict"
    )
    .expect("import counter")
});

/// Import duration in seconds.
pub static IMPORT_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "curator_import_duration_seconds",
            "Duration of moving an entry into the library",
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
        &["result"],
    )
    .expect("import duration histogram")
});

/// Catalog scan triggers by result.
pub static SCAN_TRIGGERS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("curator_scan_triggers_total", "Catalog scan requests"),
        &["result"], // "ok", "error"
    )
    .expect("scan trigger counter")
});

/// Follow-up catalog tasks after an import scan, by task and result.
pub static POST_SCAN_TASKS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "curator_post_scan_tasks_total",
            "Catalog tasks run after an import scan",
        ),
        &["task", "result"], // "identify" | "generate", "ok" | "error"
    )
    .expect("post-scan task counter")
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(PROVIDER_FETCHES.clone()),
        Box::new(CACHE_LOOKUPS.clone()),
        Box::new(ENTITIES_RECONCILED.clone()),
        Box::new(AMBIGUOUS_MATCHES.clone()),
        Box::new(AUTOMATION_PUSHES.clone()),
        Box::new(IMPORTS_TOTAL.clone()),
        Box::new(IMPORT_DURATION.clone()),
        Box::new(SCAN_TRIGGERS.clone()),
        Box::new(POST_SCAN_TASKS.clone()),
    ]
}
