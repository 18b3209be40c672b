// src/core/metrics.rs

//! Defines and registers Prometheus metrics for control-plane observability
//! (spec §10.5: carried despite the REST/auth Non-goal — the outward
//! surface is scoped out, not the ambient stack).
//!
//! This module uses `lazy_static` to ensure that metrics are registered only
//! once globally for the entire application lifetime.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram, Counter, CounterVec, Gauge, GaugeVec, Histogram, TextEncoder,
};

lazy_static! {
    // --- Cluster counts by status ---
    pub static ref CLUSTERS_BY_STATUS: GaugeVec = register_gauge_vec!(
        "clusterforge_clusters_by_status",
        "Number of clusters currently in each lifecycle status.",
        &["status"]
    )
    .unwrap();

    // --- Lifecycle controller ---
    pub static ref CLUSTER_CREATES_TOTAL: Counter =
        register_counter!("clusterforge_cluster_creates_total", "Total cluster create attempts.").unwrap();
    pub static ref CLUSTER_CREATE_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "clusterforge_cluster_create_failures_total",
        "Total cluster create failures, labeled by error category.",
        &["category"]
    )
    .unwrap();
    pub static ref CLUSTER_DELETES_TOTAL: Counter =
        register_counter!("clusterforge_cluster_deletes_total", "Total cluster deletes.").unwrap();

    // --- Health & Recovery Engine ---
    pub static ref HEALTH_CHECK_CYCLE_SECONDS: Histogram = register_histogram!(
        "clusterforge_health_check_cycle_seconds",
        "Duration of one full health-check tick across all clusters."
    )
    .unwrap();
    pub static ref RECOVERY_ATTEMPTS_TOTAL: Counter =
        register_counter!("clusterforge_recovery_attempts_total", "Total recovery attempts started.").unwrap();
    pub static ref RECOVERY_SUCCESSES_TOTAL: Counter =
        register_counter!("clusterforge_recovery_successes_total", "Total recoveries that reached HEALTHY.").unwrap();

    // --- Metrics pipeline ---
    pub static ref METRICS_PRIMARY_BUFFER_OCCUPANCY: Gauge = register_gauge!(
        "clusterforge_metrics_primary_buffer_occupancy",
        "Number of samples currently queued in the primary metrics buffer."
    )
    .unwrap();
    pub static ref METRICS_FAILED_BUFFER_OCCUPANCY: Gauge = register_gauge!(
        "clusterforge_metrics_failed_buffer_occupancy",
        "Number of samples currently queued in the failed-retry metrics buffer."
    )
    .unwrap();
    pub static ref METRICS_DRAIN_SECONDS: Histogram = register_histogram!(
        "clusterforge_metrics_drain_seconds",
        "Duration of one metrics-buffer drain into the store."
    )
    .unwrap();

    // --- Metrics bus ---
    pub static ref BUS_BROADCASTS_TOTAL: CounterVec = register_counter_vec!(
        "clusterforge_bus_broadcasts_total",
        "Total bus broadcasts sent, labeled by topic.",
        &["topic"]
    )
    .unwrap();
    pub static ref BUS_THROTTLED_TOTAL: CounterVec = register_counter_vec!(
        "clusterforge_bus_throttled_total",
        "Total publishes dropped by the bus's global throttle, labeled by topic.",
        &["topic"]
    )
    .unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text
/// format, served by the `/metrics` route (spec §10.5).
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap()
}
