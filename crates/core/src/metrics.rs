//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Scheduling (tasks run, results published)
//! - Backends (page fetch failures, results per page)
//! - Crawling (cache lookups)
//! - Keyword detection (histogram rebuilds)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Scheduling
// =============================================================================

/// Pool tasks run, by kind.
pub static TASKS_RUN: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("fanout_tasks_run_total", "Total tasks run on the worker pool"),
        &["kind"], // "perform", "crawl"
    )
    .unwrap()
});

/// Results handed to the search listener.
pub static RESULTS_PUBLISHED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "fanout_results_published_total",
        "Total results published to the listener",
    )
    .unwrap()
});

// =============================================================================
// Backends
// =============================================================================

/// Failed fetches, by error kind.
pub static FETCH_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("fanout_fetch_failures_total", "Total failed backend fetches"),
        &["kind"], // "timeout", "connection", "status", "body", "request"
    )
    .unwrap()
});

/// Results extracted per page.
pub static PAGE_RESULTS: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new("fanout_page_results", "Number of results extracted per page")
            .buckets(vec![0.0, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0]),
        &["performer"],
    )
    .unwrap()
});

// =============================================================================
// Crawling
// =============================================================================

/// Crawl cache lookups, by outcome.
pub static CRAWL_CACHE_LOOKUPS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("fanout_crawl_cache_lookups_total", "Total crawl cache lookups"),
        &["outcome"], // "hit", "miss", "negative"
    )
    .unwrap()
});

// =============================================================================
// Keyword detection
// =============================================================================

/// Histogram rebuilds delivered to the detector listener.
pub static HISTOGRAM_REBUILDS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "fanout_histogram_rebuilds_total",
            "Total keyword histogram rebuilds",
        ),
        &["feature"],
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(TASKS_RUN.clone()),
        Box::new(RESULTS_PUBLISHED.clone()),
        Box::new(FETCH_FAILURES.clone()),
        Box::new(PAGE_RESULTS.clone()),
        Box::new(CRAWL_CACHE_LOOKUPS.clone()),
        Box::new(HISTOGRAM_REBUILDS.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_metrics_register() {
        let registry = prometheus::Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }
        TASKS_RUN.with_label_values(&["perform"]).inc();
        assert!(registry
            .gather()
            .iter()
            .any(|family| family.get_name() == "fanout_tasks_run_total"));
    }
}
