//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the curator daemon:
//! - HTTP request metrics for the status API
//! - Watcher state (collected dynamically)
//! - Core reconciliation and import metrics

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use tracing::warn;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "curator_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
        &["method", "path", "status"],
    )
    .expect("http duration histogram")
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("curator_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .expect("http request counter")
});

// =============================================================================
// Watcher Metrics
// =============================================================================

/// Whether the watcher loop is running (1) or not (0).
pub static WATCHER_RUNNING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("curator_watcher_running", "Whether the watcher is running")
        .expect("watcher running gauge")
});

/// Imports currently in progress.
pub static IMPORTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "curator_imports_in_flight",
        "Number of imports currently in progress",
    )
    .expect("imports in flight gauge")
});

/// Entries seen downloading by the last poll.
pub static ENTRIES_DOWNLOADING: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "curator_entries_downloading",
        "Torrent root entries still downloading at the last poll",
    )
    .expect("downloading entries gauge")
});

/// Entries whose import failed, waiting on an operator.
pub static ENTRIES_FAILED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "curator_entries_failed",
        "Torrent root entries holding a failed import marker at the last poll",
    )
    .expect("failed entries gauge")
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    let mut collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // HTTP
        Box::new(HTTP_REQUEST_DURATION.clone()),
        Box::new(HTTP_REQUESTS_TOTAL.clone()),
        // Watcher
        Box::new(WATCHER_RUNNING.clone()),
        Box::new(IMPORTS_IN_FLIGHT.clone()),
        Box::new(ENTRIES_DOWNLOADING.clone()),
        Box::new(ENTRIES_FAILED.clone()),
    ];

    // Core metrics (reconciliation, imports, scans)
    collectors.extend(curator_core::metrics::all_metrics());

    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            warn!(error = %e, "Failed to register metric");
        }
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Collect dynamic metrics from current application state.
///
/// Called before encoding so the gauges reflect the watcher right now.
pub async fn collect_dynamic_metrics(state: &crate::state::AppState) {
    if let Some(watcher) = state.watcher() {
        let status = watcher.status().await;
        WATCHER_RUNNING.set(if status.running { 1 } else { 0 });
        IMPORTS_IN_FLIGHT.set(status.in_flight as i64);
        if let Some(summary) = status.last_summary {
            ENTRIES_DOWNLOADING.set(summary.downloading as i64);
            ENTRIES_FAILED.set(summary.failed as i64);
        }
    }
}

static NUMERIC_SEGMENT: Lazy<regex_lite::Regex> =
    Lazy::new(|| regex_lite::Regex::new(r"/\d+(/|$)").expect("numeric segment regex"));

/// Normalize a path for metric labels (replace numeric ids with placeholders).
pub fn normalize_path(path: &str) -> String {
    NUMERIC_SEGMENT.replace_all(path, "/{id}$1").into_owned()
}
