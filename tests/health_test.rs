//! Integration coverage for the health engine's reconciliation loop against
//! a real `LifecycleController` + in-memory store, using a fake driver whose
//! "running" flag the test flips directly to simulate a crashed container.

use async_trait::async_trait;
use clusterforge::core::bus::MetricsBus;
use clusterforge::core::driver::{ContainerDriver, ContainerStats, InspectResult, InspectState};
use clusterforge::core::errors::RuntimeError;
use clusterforge::core::health::HealthEngine;
use clusterforge::core::lifecycle::{CreateClusterRequest, LifecycleController};
use clusterforge::core::metrics_pipeline::MetricsPipeline;
use clusterforge::core::model::{ClusterStatus, HealthState, ResourceLimits, ResourceLimitsRequest};
use clusterforge::core::ports::PortAllocator;
use clusterforge::core::store::memory::InMemoryStore;
use clusterforge::core::store::Store;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

#[derive(Default)]
struct ToggleDriver {
    running: AtomicBool,
}

#[async_trait]
impl ContainerDriver for ToggleDriver {
    async fn run(&self, _compose_path: &str) -> Result<(), RuntimeError> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }
    async fn start(&self, _name: &str) -> Result<(), RuntimeError> {
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }
    async fn stop(&self, _name: &str) -> Result<(), RuntimeError> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
    async fn remove(&self, _name: &str) -> Result<(), RuntimeError> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }
    async fn inspect(&self, _name: &str) -> Result<InspectResult, RuntimeError> {
        let state = if self.running.load(Ordering::SeqCst) { InspectState::Running } else { InspectState::Absent };
        let status_text = if state == InspectState::Running { "running" } else { "absent" }.to_string();
        Ok(InspectResult { state, restart_count: 0, uptime_seconds: 5, exit_code: None, status_text })
    }
    async fn stats(&self, _name: &str) -> Result<ContainerStats, RuntimeError> {
        Ok(ContainerStats {
            cpu_percent_raw: 1.0,
            mem_used_bytes: 1024,
            mem_limit_bytes: 512 * 1024 * 1024,
            net_rx_bytes: 0,
            net_tx_bytes: 0,
            block_read_bytes: 0,
            block_write_bytes: 0,
        })
    }
    async fn resolve_id(&self, _name: &str) -> Result<Option<String>, RuntimeError> {
        Ok(Some("fake-id".to_string()))
    }
    async fn prune_unused_networks(&self) -> Result<(), RuntimeError> {
        Ok(())
    }
    async fn logs(&self, _name: &str, _tail_lines: usize) -> Result<String, RuntimeError> {
        Ok(String::new())
    }
    fn invalidate_cache(&self, _name: &str) {}
}

#[tokio::test]
async fn check_tick_marks_cluster_stopped_when_container_goes_absent() {
    let templates = tempdir().unwrap();
    let clusters = tempdir().unwrap();
    let dir = templates.path().join("php_web");
    tokio::fs::create_dir_all(&dir).await.unwrap();
    tokio::fs::write(
        dir.join("docker-compose.yml"),
        "services:\n  app:\n    container_name: placeholder\n    ports:\n      - \"8080:80\"\n    volumes:\n      - ./data:/data\n",
    )
    .await
    .unwrap();

    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let concrete_driver = Arc::new(ToggleDriver::default());
    let driver: Arc<dyn ContainerDriver> = concrete_driver.clone();
    let ports = Arc::new(PortAllocator::new());
    let bus = Arc::new(MetricsBus::new());
    let pipeline = Arc::new(MetricsPipeline::new(driver.clone(), store.clone(), bus));

    let lifecycle = Arc::new(LifecycleController::new(
        store.clone(),
        driver.clone(),
        ports,
        templates.path().to_path_buf(),
        clusters.path().to_path_buf(),
        ResourceLimits { cpu_cores: 1.0, memory_mib: 512, disk_gib: 5, network_mbps: 100 },
        pipeline,
    ));

    let cluster = lifecycle
        .create(CreateClusterRequest {
            name: "dana".to_string(),
            owner_id: "dana".to_string(),
            template: "php_web".to_string(),
            limits: ResourceLimitsRequest::default(),
            with_ftp: false,
            health_max_recovery_attempts: 3,
            health_retry_interval_s: 30,
            health_cooldown_period_s: 300,
        })
        .await
        .unwrap();
    assert_eq!(cluster.status, ClusterStatus::Running);

    let health = HealthEngine::new(store.clone(), driver.clone(), lifecycle.clone());

    // Simulate a crash: the driver now reports the container absent.
    concrete_driver.running.store(false, Ordering::SeqCst);

    health.check_tick().await;

    let reconciled = store.get_cluster(cluster.id).await.unwrap().unwrap();
    assert_eq!(reconciled.status, ClusterStatus::Stopped);

    let status = store.get_health(cluster.id).await.unwrap().unwrap();
    assert_eq!(status.state, HealthState::Failed);
    assert_eq!(status.total_failures, 1);
}
