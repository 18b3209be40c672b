// src/core/health/mod.rs

//! The Health & Recovery Engine (spec §4.G): a per-cluster check cycle
//! that reconciles observed container state with stored intent, and a
//! bounded, cooldown-gated recovery process for clusters that go FAILED.

pub mod cache;

use crate::core::driver::{ContainerDriver, InspectState};
use crate::core::errors::ControlPlaneError;
use crate::core::lifecycle::LifecycleController;
use crate::core::model::{Cluster, ClusterId, ClusterStatus, HealthMetric, HealthState, HealthStatus};
use crate::core::store::Store;
use cache::{ActiveClusterListCache, HealthStatusCache};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const CHECK_INTERVAL: Duration = Duration::from_secs(60);
pub const RECOVERY_SCAN_INTERVAL: Duration = Duration::from_secs(300);
const RECOVERY_SETTLE: Duration = Duration::from_secs(2);
const RECOVERY_POST_START_WAIT: Duration = Duration::from_secs(5);

/// An observed, classified container state (spec §4.G step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Observed {
    Absent,
    Stopped,
    Running,
}

pub struct HealthEngine {
    store: Arc<dyn Store>,
    driver: Arc<dyn ContainerDriver>,
    lifecycle: Arc<LifecycleController>,
    pub status_cache: HealthStatusCache,
    pub active_list_cache: ActiveClusterListCache,
}

impl HealthEngine {
    pub fn new(store: Arc<dyn Store>, driver: Arc<dyn ContainerDriver>, lifecycle: Arc<LifecycleController>) -> Self {
        Self {
            status_cache: HealthStatusCache::new(store.clone()),
            active_list_cache: ActiveClusterListCache::new(store.clone()),
            store,
            driver,
            lifecycle,
        }
    }

    /// Runs the check cycle for every cluster returned by the active list
    /// cache (spec §4.G).
    pub async fn check_tick(&self) {
        let clusters = self.active_list_cache.get().await;
        for cluster in clusters {
            if let Err(e) = self.check_one(&cluster).await {
                warn!(cluster_id = %cluster.id, error = %e, "health check cycle failed");
            }
        }
    }

    async fn check_one(&self, cluster: &Cluster) -> Result<(), ControlPlaneError> {
        let mut status = self
            .status_cache
            .get(cluster.id)
            .await
            .unwrap_or_else(|| HealthStatus::new(cluster.id, 3, 30, 300));

        if !status.monitoring_enabled {
            return Ok(());
        }

        let sanitized = cluster.sanitized_name();
        let inspect_result = self.driver.inspect(&sanitized).await.ok();
        let observed = match &inspect_result {
            Some(inspect) => match inspect.state {
                InspectState::Running => Observed::Running,
                InspectState::Stopped => Observed::Stopped,
                InspectState::Absent => Observed::Absent,
            },
            None => Observed::Absent,
        };
        let status_text = inspect_result
            .as_ref()
            .map(|i| i.status_text.clone())
            .unwrap_or_else(|| "absent".to_string());

        let sample = if observed == Observed::Running {
            match self.driver.stats(&sanitized).await {
                Ok(stats) => {
                    let mem_pct = crate::core::metrics_pipeline::parse::percent_of_limit(
                        stats.mem_used_bytes as f64,
                        cluster.limits.memory_mib as f64 * 1024.0 * 1024.0,
                    );
                    Some(build_health_metric(cluster, &stats, mem_pct, &status_text))
                }
                Err(_) => None,
            }
        } else {
            None
        };
        let sample = sample.unwrap_or_else(|| {
            let mut zero = HealthMetric::zero(cluster.id, cluster.limits.memory_mib as f64);
            zero.container_status = status_text.clone();
            zero
        });

        let new_state = match observed {
            Observed::Absent | Observed::Stopped => HealthState::Failed,
            Observed::Running => HealthState::Healthy,
        };
        status.state = new_state;

        let mut updated_cluster = cluster.clone();
        reconcile_status(&mut updated_cluster, observed);
        if updated_cluster.status != cluster.status || updated_cluster.container_id != cluster.container_id {
            self.store.update_cluster(updated_cluster).await?;
        }

        match new_state {
            HealthState::Healthy => {
                status.error_message = None;
            }
            _ => {
                status.total_failures += 1;
                status.error_message = Some("container not running".to_string());
            }
        }
        status.last_check = Some(Utc::now());
        if new_state == HealthState::Healthy {
            status.last_success = Some(Utc::now());
        }
        status.last_container_status = Some(format!("{observed:?}"));
        status.last_sample = Some(sample);

        self.store.upsert_health(status).await?;
        self.status_cache.invalidate(cluster.id);
        self.store.append_metric(sample).await?;
        Ok(())
    }

    /// Eligibility per spec §4.G "Recovery": FAILED, monitoring enabled,
    /// stored status not in {STOPPED, ERROR, DELETED}, attempts below
    /// cap, and cooldown elapsed.
    fn recovery_eligible(&self, cluster: &Cluster, status: &HealthStatus) -> bool {
        if status.state != HealthState::Failed || !status.monitoring_enabled {
            return false;
        }
        if matches!(cluster.status, ClusterStatus::Stopped | ClusterStatus::Error | ClusterStatus::Deleted) {
            return false;
        }
        if status.recovery_attempts >= status.max_recovery_attempts {
            return false;
        }
        match status.last_recovery_attempt {
            Some(last) => (Utc::now() - last).num_seconds() as u64 >= status.cooldown_period_s,
            None => true,
        }
    }

    /// Scans all FAILED clusters and attempts recovery where eligible
    /// (spec §4.G "Scheduled recovery scans FAILED clusters every 5 min").
    pub async fn recovery_scan(&self) {
        let clusters = self.active_list_cache.get().await;
        for cluster in clusters {
            let Some(status) = self.status_cache.get(cluster.id).await else {
                continue;
            };
            if self.recovery_eligible(&cluster, &status) {
                if let Err(e) = self.recover_one(&cluster, status).await {
                    warn!(cluster_id = %cluster.id, error = %e, "recovery attempt failed");
                }
            }
        }
    }

    async fn recover_one(&self, cluster: &Cluster, mut status: HealthStatus) -> Result<(), ControlPlaneError> {
        status.state = HealthState::Recovering;
        status.last_recovery_attempt = Some(Utc::now());
        self.store.upsert_health(status.clone()).await?;
        self.status_cache.invalidate(cluster.id);

        let sanitized = cluster.sanitized_name();
        let _ = self.driver.stop(&sanitized).await;
        tokio::time::sleep(RECOVERY_SETTLE).await;
        let _ = self.driver.remove(&sanitized).await;
        let _ = self.driver.prune_unused_networks().await;

        let start_result = self.lifecycle.start(cluster.id).await;
        tokio::time::sleep(RECOVERY_POST_START_WAIT).await;

        let recovered = start_result.is_ok()
            && matches!(
                self.driver.inspect(&sanitized).await.map(|i| i.state),
                Ok(InspectState::Running)
            );

        if recovered {
            status.state = HealthState::Healthy;
            status.recovery_attempts = 0;
            status.total_recoveries += 1;
            info!(cluster_id = %cluster.id, "recovery succeeded");
        } else {
            status.state = HealthState::Failed;
            status.recovery_attempts += 1;
            warn!(cluster_id = %cluster.id, attempts = status.recovery_attempts, "recovery failed");
        }
        self.store.upsert_health(status).await?;
        self.status_cache.invalidate(cluster.id);
        Ok(())
    }
}

/// Status reconciliation honoring user intent (spec §4.G step 4): a
/// stored STOPPED is never overridden by an observed RUNNING.
fn reconcile_status(cluster: &mut Cluster, observed: Observed) {
    match observed {
        Observed::Absent | Observed::Stopped => {
            if cluster.status != ClusterStatus::Stopped {
                cluster.status = ClusterStatus::Stopped;
            }
        }
        Observed::Running => {
            if cluster.status == ClusterStatus::Stopped {
                // Intentional: do not fight the operator's stop command.
            } else if matches!(cluster.status, ClusterStatus::Created | ClusterStatus::Error) {
                cluster.status = ClusterStatus::Running;
            }
        }
    }
}

fn build_health_metric(
    cluster: &Cluster,
    stats: &crate::core::driver::ContainerStats,
    mem_percent: f64,
    status_text: &str,
) -> HealthMetric {
    HealthMetric {
        cluster_id: cluster.id,
        timestamp: Utc::now(),
        cpu_percent_of_limit: crate::core::metrics_pipeline::parse::cpu_percent_of_limit(stats.cpu_percent_raw, cluster.limits.cpu_cores),
        memory_used_mib: stats.mem_used_bytes as f64 / (1024.0 * 1024.0),
        memory_limit_mib: cluster.limits.memory_mib as f64,
        memory_percent: mem_percent,
        disk_used_gib: 0.0,
        disk_limit_gib: cluster.limits.disk_gib as f64,
        disk_percent: 0.0,
        disk_read_bytes: stats.block_read_bytes,
        disk_write_bytes: stats.block_write_bytes,
        network_rx_bytes: stats.net_rx_bytes,
        network_tx_bytes: stats.net_tx_bytes,
        response_time_ms: None,
        container_restart_count: 0,
        container_uptime_seconds: 0,
        container_status: status_text.to_string(),
        container_exit_code: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cluster_with_status(status: ClusterStatus) -> Cluster {
        Cluster {
            id: ClusterId::new_v4(),
            name: "c".to_string(),
            root_path: "/tmp/c".to_string(),
            port: 20000,
            ftp_port: None,
            ftp_username: None,
            ftp_password: None,
            container_id: None,
            owner_id: "alice".to_string(),
            status,
            limits: crate::core::model::ResourceLimits {
                cpu_cores: 1.0,
                memory_mib: 512,
                disk_gib: 5,
                network_mbps: 100,
            },
            template: "t".to_string(),
            message: None,
        }
    }

    #[test]
    fn stopped_is_never_overridden_by_observed_running() {
        let mut cluster = cluster_with_status(ClusterStatus::Stopped);
        reconcile_status(&mut cluster, Observed::Running);
        assert_eq!(cluster.status, ClusterStatus::Stopped);
    }

    #[test]
    fn created_flips_to_running_when_observed_running() {
        let mut cluster = cluster_with_status(ClusterStatus::Created);
        reconcile_status(&mut cluster, Observed::Running);
        assert_eq!(cluster.status, ClusterStatus::Running);
    }

    #[test]
    fn running_flips_to_stopped_when_observed_absent() {
        let mut cluster = cluster_with_status(ClusterStatus::Running);
        reconcile_status(&mut cluster, Observed::Absent);
        assert_eq!(cluster.status, ClusterStatus::Stopped);
    }
}
