//! End-to-end lifecycle tests against an in-memory store and a fake
//! container driver that behaves like a real runtime closely enough to
//! exercise create/start/stop/delete without shelling out to anything.

use async_trait::async_trait;
use clusterforge::core::driver::{ContainerDriver, ContainerStats, InspectResult, InspectState};
use clusterforge::core::errors::RuntimeError;
use clusterforge::core::lifecycle::{CreateClusterRequest, LifecycleController};
use clusterforge::core::metrics_pipeline::MetricsPipeline;
use clusterforge::core::bus::MetricsBus;
use clusterforge::core::model::{ClusterStatus, ResourceLimitsRequest};
use clusterforge::core::ports::PortAllocator;
use clusterforge::core::store::memory::InMemoryStore;
use clusterforge::core::store::Store;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::tempdir;

/// A single-container fake driver: `run`/`start` flip it to running,
/// `stop`/`remove` flip it back off. Good enough to drive one
/// `LifecycleController` test cluster end to end without a real runtime.
#[derive(Default)]
struct FakeDriver {
    running: AtomicBool,
}

#[async_trait]
impl ContainerDriver for FakeDriver {
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
        let state = if self.running.load(Ordering::SeqCst) { InspectState::Running } else { InspectState::Stopped };
        let status_text = if state == InspectState::Running { "running" } else { "exited" }.to_string();
        Ok(InspectResult {
            state,
            restart_count: 0,
            uptime_seconds: 10,
            exit_code: None,
            status_text,
        })
    }

    async fn stats(&self, _name: &str) -> Result<ContainerStats, RuntimeError> {
        Ok(ContainerStats {
            cpu_percent_raw: 5.0,
            mem_used_bytes: 64 * 1024 * 1024,
            mem_limit_bytes: 512 * 1024 * 1024,
            net_rx_bytes: 100,
            net_tx_bytes: 100,
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

/// A driver that reports a restart loop (`restarting`, restart_count above
/// threshold) until it has been `run` a second time, simulating the
/// container's actual relaunch by `remediate_restart_loop`. Tracks whether
/// `stop`/`remove` were invoked so the test can assert the full stop,
/// remove, recreate sequence happened rather than just the end state.
#[derive(Default)]
struct RestartLoopDriver {
    run_count: AtomicUsize,
    stopped: AtomicBool,
    removed: AtomicBool,
}

#[async_trait]
impl ContainerDriver for RestartLoopDriver {
    async fn run(&self, _compose_path: &str) -> Result<(), RuntimeError> {
        self.run_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self, _name: &str) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn stop(&self, _name: &str) -> Result<(), RuntimeError> {
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, _name: &str) -> Result<(), RuntimeError> {
        self.removed.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn inspect(&self, _name: &str) -> Result<InspectResult, RuntimeError> {
        if self.run_count.load(Ordering::SeqCst) < 2 {
            Ok(InspectResult {
                state: InspectState::Stopped,
                restart_count: 5,
                uptime_seconds: 1,
                exit_code: None,
                status_text: "restarting".to_string(),
            })
        } else {
            Ok(InspectResult {
                state: InspectState::Running,
                restart_count: 5,
                uptime_seconds: 10,
                exit_code: None,
                status_text: "running".to_string(),
            })
        }
    }

    async fn stats(&self, _name: &str) -> Result<ContainerStats, RuntimeError> {
        Ok(ContainerStats {
            cpu_percent_raw: 5.0,
            mem_used_bytes: 64 * 1024 * 1024,
            mem_limit_bytes: 512 * 1024 * 1024,
            net_rx_bytes: 100,
            net_tx_bytes: 100,
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

async fn make_controller(templates_base: &std::path::Path, clusters_base: &std::path::Path) -> LifecycleController {
    make_controller_with_driver(templates_base, clusters_base, Arc::new(FakeDriver::default())).await
}

async fn make_controller_with_driver(
    templates_base: &std::path::Path,
    clusters_base: &std::path::Path,
    driver: Arc<dyn ContainerDriver>,
) -> LifecycleController {
    let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
    let ports = Arc::new(PortAllocator::new());
    let bus = Arc::new(MetricsBus::new());
    let pipeline = Arc::new(MetricsPipeline::new(driver.clone(), store.clone(), bus));

    LifecycleController::new(
        store,
        driver,
        ports,
        templates_base.to_path_buf(),
        clusters_base.to_path_buf(),
        clusterforge::core::model::ResourceLimits {
            cpu_cores: 1.0,
            memory_mib: 512,
            disk_gib: 5,
            network_mbps: 100,
        },
        pipeline,
    )
}

async fn write_template(templates_base: &std::path::Path, name: &str) {
    let dir = templates_base.join(name);
    tokio::fs::create_dir_all(&dir).await.unwrap();
    tokio::fs::write(
        dir.join("docker-compose.yml"),
        "services:\n  app:\n    container_name: placeholder\n    ports:\n      - \"8080:80\"\n    volumes:\n      - ./data:/data\n",
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn create_reaches_running_and_persists_container_id() {
    let templates = tempdir().unwrap();
    let clusters = tempdir().unwrap();
    write_template(templates.path(), "php_web").await;

    let controller = make_controller(templates.path(), clusters.path()).await;
    let cluster = controller
        .create(CreateClusterRequest {
            name: "alice".to_string(),
            owner_id: "alice".to_string(),
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
    assert_eq!(cluster.container_id.as_deref(), Some("fake-id"));
}

#[tokio::test]
async fn create_rejects_unknown_template() {
    let templates = tempdir().unwrap();
    let clusters = tempdir().unwrap();
    let controller = make_controller(templates.path(), clusters.path()).await;

    let err = controller
        .create(CreateClusterRequest {
            name: "bob".to_string(),
            owner_id: "bob".to_string(),
            template: "does_not_exist".to_string(),
            limits: ResourceLimitsRequest::default(),
            with_ftp: false,
            health_max_recovery_attempts: 3,
            health_retry_interval_s: 30,
            health_cooldown_period_s: 300,
        })
        .await
        .unwrap_err();

    assert!(err.to_string().contains("template not found"));
}

#[tokio::test]
async fn stop_then_delete_releases_the_port() {
    let templates = tempdir().unwrap();
    let clusters = tempdir().unwrap();
    write_template(templates.path(), "php_web").await;

    let controller = make_controller(templates.path(), clusters.path()).await;
    let cluster = controller
        .create(CreateClusterRequest {
            name: "carol".to_string(),
            owner_id: "carol".to_string(),
            template: "php_web".to_string(),
            limits: ResourceLimitsRequest::default(),
            with_ftp: false,
            health_max_recovery_attempts: 3,
            health_retry_interval_s: 30,
            health_cooldown_period_s: 300,
        })
        .await
        .unwrap();

    controller.stop(cluster.id).await.unwrap();
    controller.delete(cluster.id).await.unwrap();

    assert!(!tokio::fs::try_exists(&cluster.root_path).await.unwrap());
}

#[tokio::test]
async fn restart_loop_is_detected_and_the_container_is_relaunched() {
    let templates = tempdir().unwrap();
    let clusters = tempdir().unwrap();
    write_template(templates.path(), "php_web").await;

    let driver = Arc::new(RestartLoopDriver::default());
    let controller = make_controller_with_driver(templates.path(), clusters.path(), driver.clone()).await;

    let cluster = controller
        .create(CreateClusterRequest {
            name: "dave".to_string(),
            owner_id: "dave".to_string(),
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
    assert!(driver.run_count.load(Ordering::SeqCst) >= 2, "container must be recreated, not just polled");
    assert!(driver.stopped.load(Ordering::SeqCst), "restart-loop guard must stop the looping container");
    assert!(driver.removed.load(Ordering::SeqCst), "restart-loop guard must remove the looping container");
}
