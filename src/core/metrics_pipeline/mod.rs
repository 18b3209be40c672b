// src/core/metrics_pipeline/mod.rs

//! The high-frequency metrics pipeline (spec §4.H): samples running
//! clusters at 10 Hz, change-gates and delivers over the metrics bus at
//! 20 Hz, and drains a coarse persistent-write buffer every 10 s while
//! coordinating with in-flight cluster deletion.

pub mod parse;

use crate::core::bus::{BusEnvelope, MetricsBus, Topic};
use crate::core::driver::{ContainerDriver, InspectState};
use crate::core::model::{Cluster, ClusterId, HealthMetric};
use crate::core::store::Store;
use dashmap::{DashMap, DashSet};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub const SAMPLE_INTERVAL: Duration = Duration::from_millis(100);
pub const PER_CLUSTER_RESAMPLE_FLOOR: Duration = Duration::from_millis(200);
pub const DRAIN_INTERVAL: Duration = Duration::from_secs(10);
pub const PER_CLUSTER_WRITE_FLOOR: Duration = Duration::from_secs(60);
pub const PRIMARY_BUFFER_CAP: usize = 1000;
pub const FAILED_BUFFER_CAP: usize = 100;

/// Owner recorded on the `/topic/stats` system-aggregate envelope: no real
/// cluster owns it, so only admins (who bypass the owner check in
/// [`crate::core::bus::visible_to`]) ever see it.
const SYSTEM_STATS_OWNER: &str = "__system__";

const CPU_GATE: f64 = 0.1;
const MEM_GATE: f64 = 0.1;
const DISK_GATE: f64 = 0.1;
const RESPONSE_TIME_GATE_MS: u64 = 10;
const NET_BYTES_GATE: u64 = 1024;
const UPTIME_GATE_S: u64 = 1;

/// Shared state for the metrics pipeline's sampling, delivery, and drain
/// stages (spec §4.H).
pub struct MetricsPipeline {
    driver: Arc<dyn ContainerDriver>,
    store: Arc<dyn Store>,
    bus: Arc<MetricsBus>,
    last_sent: DashMap<ClusterId, HealthMetric>,
    last_sampled_at: DashMap<ClusterId, Instant>,
    last_saved_at: DashMap<ClusterId, Instant>,
    primary_buffer: Mutex<VecDeque<HealthMetric>>,
    failed_buffer: Mutex<VecDeque<HealthMetric>>,
    /// Clusters currently being torn down by the lifecycle controller;
    /// the drain skips entries for these ids (spec §4.H "coordination with
    /// deletion").
    deleting: DashSet<ClusterId>,
    /// Authoritative set of live cluster ids, refreshed every 30 s.
    valid_ids: DashSet<ClusterId>,
    dropped_clusters_logged_this_drain: Mutex<bool>,
}

impl MetricsPipeline {
    pub fn new(driver: Arc<dyn ContainerDriver>, store: Arc<dyn Store>, bus: Arc<MetricsBus>) -> Self {
        Self {
            driver,
            store,
            bus,
            last_sent: DashMap::new(),
            last_sampled_at: DashMap::new(),
            last_saved_at: DashMap::new(),
            primary_buffer: Mutex::new(VecDeque::new()),
            failed_buffer: Mutex::new(VecDeque::new()),
            deleting: DashSet::new(),
            valid_ids: DashSet::new(),
            dropped_clusters_logged_this_drain: Mutex::new(false),
        }
    }

    /// Marks `cluster_id` as being deleted, scrubbing every buffer and
    /// cache entry for it (spec §4.H). Must be called before the cascade
    /// delete and only cleared via [`Self::finish_deleting`].
    pub fn begin_deleting(&self, cluster_id: ClusterId) {
        self.deleting.insert(cluster_id);
        self.primary_buffer.lock().retain(|m| m.cluster_id != cluster_id);
        self.failed_buffer.lock().retain(|m| m.cluster_id != cluster_id);
        self.last_sent.remove(&cluster_id);
        self.last_sampled_at.remove(&cluster_id);
        self.last_saved_at.remove(&cluster_id);
        self.valid_ids.remove(&cluster_id);
    }

    /// Releases `cluster_id` from the deleting set once the cascade delete
    /// has completed.
    pub fn finish_deleting(&self, cluster_id: ClusterId) {
        self.deleting.remove(&cluster_id);
    }

    /// Refreshes the valid-cluster-id set from the store (spec §4.H: every
    /// 30 s, authoritative).
    pub async fn refresh_valid_ids(&self) {
        match self.store.list_clusters().await {
            Ok(clusters) => {
                self.valid_ids.clear();
                for c in clusters {
                    self.valid_ids.insert(c.id);
                }
            }
            Err(e) => warn!(error = %e, "failed to refresh valid-cluster-id set"),
        }
    }

    /// Samples every running cluster once, respecting the per-cluster
    /// 200 ms resample floor (spec §4.H).
    pub async fn sample_tick(&self, running_clusters: &[Cluster]) {
        for cluster in running_clusters {
            if self.deleting.contains(&cluster.id) {
                continue;
            }
            if let Some(last) = self.last_sampled_at.get(&cluster.id) {
                if last.elapsed() < PER_CLUSTER_RESAMPLE_FLOOR {
                    continue;
                }
            }
            self.last_sampled_at.insert(cluster.id, Instant::now());
            self.sample_one(cluster).await;
        }
        self.publish_aggregate_stats();
    }

    /// Publishes a system-wide aggregate derived from the last-sent cache
    /// to `/topic/stats` (spec §4.H: "`/topic/stats` carries a
    /// system-aggregate derived from the last-sent cache"). Subject to the
    /// same 20 Hz bus throttle as `/topic/metrics`.
    fn publish_aggregate_stats(&self) {
        let samples: Vec<HealthMetric> = self.last_sent.iter().map(|e| e.value().clone()).collect();
        let Some(payload) = build_aggregate_payload(&samples) else {
            return;
        };
        let envelope = BusEnvelope {
            topic_path: Topic::Stats.path(),
            owner_id: SYSTEM_STATS_OWNER.to_string(),
            payload,
        };
        self.bus.publish(Topic::Stats, envelope, false);
    }

    async fn sample_one(&self, cluster: &Cluster) {
        let container_name = cluster.sanitized_name();
        let inspect = match self.driver.inspect(&container_name).await {
            Ok(i) => i,
            Err(e) => {
                warn!(cluster_id = %cluster.id, error = %e, "metrics sample inspect failed");
                return;
            }
        };

        let sample = if inspect.state != InspectState::Running {
            let mut zero = HealthMetric::zero(cluster.id, cluster.limits.memory_mib as f64);
            zero.container_status = inspect.status_text.clone();
            zero
        } else {
            match self.driver.stats(&container_name).await {
                Ok(stats) => build_metric(cluster, &inspect, &stats),
                Err(e) => {
                    warn!(cluster_id = %cluster.id, error = %e, "metrics sample stats failed");
                    return;
                }
            }
        };

        self.deliver(cluster, sample);
    }

    fn deliver(&self, cluster: &Cluster, sample: HealthMetric) {
        let should_send = match self.last_sent.get(&cluster.id) {
            Some(prev) => changed_enough(&prev, &sample),
            None => true,
        };

        if should_send {
            let envelope = BusEnvelope {
                topic_path: Topic::Metrics.path(),
                owner_id: cluster.owner_id.clone(),
                payload: serde_json::json!({ cluster.id.to_string(): sample_to_json(&sample) }),
            };
            self.bus.publish(Topic::Metrics, envelope, false);
            self.last_sent.insert(cluster.id, sample);
        }

        self.enqueue_for_persistence(sample);
    }

    fn enqueue_for_persistence(&self, sample: HealthMetric) {
        let mut buf = self.primary_buffer.lock();
        if buf.len() >= PRIMARY_BUFFER_CAP {
            let mut logged = self.dropped_clusters_logged_this_drain.lock();
            if !*logged {
                warn!("metrics primary buffer at capacity ({PRIMARY_BUFFER_CAP}); dropping new samples until next drain");
                *logged = true;
            }
            return;
        }
        buf.push_back(sample);
    }

    /// Drains the primary and failed-retry buffers into the store every
    /// 10 s, enforcing the ≤1/cluster/60s persistent write rate and the
    /// deletion/validity coordination rules (spec §4.H).
    pub async fn drain(&self) {
        let started = Instant::now();
        *self.dropped_clusters_logged_this_drain.lock() = false;

        let batch: Vec<HealthMetric> = self.primary_buffer.lock().drain(..).collect();
        let retryable: Vec<HealthMetric> = self.failed_buffer.lock().drain(..).collect();

        let mut written = 0usize;
        for sample in batch.into_iter().chain(retryable.into_iter()) {
            if self.deleting.contains(&sample.cluster_id) {
                continue;
            }
            if !self.valid_ids.contains(&sample.cluster_id) {
                continue;
            }
            if let Some(last) = self.last_saved_at.get(&sample.cluster_id) {
                if last.elapsed() < PER_CLUSTER_WRITE_FLOOR {
                    continue;
                }
            }

            match self.store.append_metric(sample).await {
                Ok(()) => {
                    self.last_saved_at.insert(sample.cluster_id, Instant::now());
                    written += 1;
                }
                Err(e) => {
                    warn!(cluster_id = %sample.cluster_id, error = %e, "metric write failed, moving to failed-retry buffer");
                    let mut failed = self.failed_buffer.lock();
                    if failed.len() < FAILED_BUFFER_CAP {
                        failed.push_back(sample);
                    }
                }
            }
        }

        let elapsed = started.elapsed();
        if elapsed > Duration::from_secs(1) {
            warn!(?elapsed, written, "metrics drain was slow");
        } else {
            info!(written, ?elapsed, "metrics drain complete");
        }
    }
}

fn changed_enough(prev: &HealthMetric, next: &HealthMetric) -> bool {
    if (prev.cpu_percent_of_limit - next.cpu_percent_of_limit).abs() >= CPU_GATE {
        return true;
    }
    if (prev.memory_percent - next.memory_percent).abs() >= MEM_GATE {
        return true;
    }
    if (prev.disk_percent - next.disk_percent).abs() >= DISK_GATE {
        return true;
    }
    if let (Some(a), Some(b)) = (prev.response_time_ms, next.response_time_ms) {
        if a.abs_diff(b) >= RESPONSE_TIME_GATE_MS {
            return true;
        }
    }
    if prev.container_status != next.container_status {
        return true;
    }
    let prev_bytes = prev.network_rx_bytes + prev.network_tx_bytes;
    let next_bytes = next.network_rx_bytes + next.network_tx_bytes;
    if prev_bytes.abs_diff(next_bytes) >= NET_BYTES_GATE {
        return true;
    }
    if prev.container_uptime_seconds.abs_diff(next.container_uptime_seconds) >= UPTIME_GATE_S {
        return true;
    }
    false
}

fn build_metric(
    cluster: &Cluster,
    inspect: &crate::core::driver::InspectResult,
    stats: &crate::core::driver::ContainerStats,
) -> HealthMetric {
    let memory_limit_mib = if cluster.limits.memory_mib > 0 {
        cluster.limits.memory_mib as f64
    } else {
        stats.mem_limit_bytes as f64 / (1024.0 * 1024.0)
    };
    let memory_used_mib = stats.mem_used_bytes as f64 / (1024.0 * 1024.0);
    let memory_percent = parse::percent_of_limit(memory_used_mib, memory_limit_mib);

    let cpu_percent_of_limit = parse::cpu_percent_of_limit(stats.cpu_percent_raw, cluster.limits.cpu_cores);

    HealthMetric {
        cluster_id: cluster.id,
        timestamp: chrono::Utc::now(),
        cpu_percent_of_limit,
        memory_used_mib,
        memory_limit_mib,
        memory_percent,
        disk_used_gib: 0.0,
        disk_limit_gib: cluster.limits.disk_gib as f64,
        disk_percent: 0.0,
        disk_read_bytes: stats.block_read_bytes,
        disk_write_bytes: stats.block_write_bytes,
        network_rx_bytes: stats.net_rx_bytes,
        network_tx_bytes: stats.net_tx_bytes,
        response_time_ms: None,
        container_restart_count: inspect.restart_count,
        container_uptime_seconds: inspect.uptime_seconds,
        container_status: inspect.status_text.clone(),
        container_exit_code: inspect.exit_code,
    }
}

/// Builds the `/topic/stats` system-aggregate payload from the last-sent
/// sample of every cluster currently being tracked. `None` when no cluster
/// has sent a sample yet, so there is nothing useful to publish.
fn build_aggregate_payload(samples: &[HealthMetric]) -> Option<serde_json::Value> {
    if samples.is_empty() {
        return None;
    }
    let count = samples.len() as f64;
    let avg_cpu_percent_of_limit = samples.iter().map(|m| m.cpu_percent_of_limit).sum::<f64>() / count;
    let avg_memory_percent = samples.iter().map(|m| m.memory_percent).sum::<f64>() / count;
    let total_network_rx_bytes: u64 = samples.iter().map(|m| m.network_rx_bytes).sum();
    let total_network_tx_bytes: u64 = samples.iter().map(|m| m.network_tx_bytes).sum();

    Some(serde_json::json!({
        "cluster_count": samples.len(),
        "avg_cpu_percent_of_limit": avg_cpu_percent_of_limit,
        "avg_memory_percent": avg_memory_percent,
        "total_network_rx_bytes": total_network_rx_bytes,
        "total_network_tx_bytes": total_network_tx_bytes,
    }))
}

fn sample_to_json(sample: &HealthMetric) -> serde_json::Value {
    serde_json::json!({
        "cpu_percent_of_limit": sample.cpu_percent_of_limit,
        "memory_percent": sample.memory_percent,
        "disk_percent": sample.disk_percent,
        "network_rx_bytes": sample.network_rx_bytes,
        "network_tx_bytes": sample.network_tx_bytes,
        "container_uptime_seconds": sample.container_uptime_seconds,
        "container_restart_count": sample.container_restart_count,
        "container_status": sample.container_status,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_metric(id: ClusterId) -> HealthMetric {
        HealthMetric::zero(id, 512.0)
    }

    #[test]
    fn change_gate_requires_no_delta_below_thresholds() {
        let id = ClusterId::new_v4();
        let prev = base_metric(id);
        let next = base_metric(id);
        assert!(!changed_enough(&prev, &next));
    }

    #[test]
    fn change_gate_fires_on_cpu_delta() {
        let id = ClusterId::new_v4();
        let prev = base_metric(id);
        let mut next = base_metric(id);
        next.cpu_percent_of_limit = 0.2;
        assert!(changed_enough(&prev, &next));
    }

    #[test]
    fn change_gate_fires_on_network_delta() {
        let id = ClusterId::new_v4();
        let prev = base_metric(id);
        let mut next = base_metric(id);
        next.network_rx_bytes = 2048;
        assert!(changed_enough(&prev, &next));
    }

    #[test]
    fn aggregate_payload_is_none_when_no_samples_yet() {
        assert!(build_aggregate_payload(&[]).is_none());
    }

    #[test]
    fn aggregate_payload_averages_across_clusters() {
        let mut a = base_metric(ClusterId::new_v4());
        a.cpu_percent_of_limit = 20.0;
        a.memory_percent = 40.0;
        let mut b = base_metric(ClusterId::new_v4());
        b.cpu_percent_of_limit = 60.0;
        b.memory_percent = 80.0;

        let payload = build_aggregate_payload(&[a, b]).unwrap();
        assert_eq!(payload["cluster_count"], 2);
        assert_eq!(payload["avg_cpu_percent_of_limit"], 40.0);
        assert_eq!(payload["avg_memory_percent"], 60.0);
    }
}
