// src/core/lifecycle/mod.rs

//! The Cluster Lifecycle Controller (spec §4.E): create, start, stop,
//! update, and delete, plus the error-classification/remediation and
//! restart-loop-guard machinery that makes those operations resilient to
//! a flaky container runtime.

pub mod locks;
pub mod remediation;

use crate::core::compose::{self, ComposeParams};
use crate::core::driver::{ContainerDriver, InspectState};
use crate::core::errors::{truncate_for_storage, ControlPlaneError, RuntimeError};
use crate::core::metrics_pipeline::MetricsPipeline;
use crate::core::model::{sanitize_name, Cluster, ClusterId, ClusterStatus, HealthStatus, ResourceLimits, ResourceLimitsRequest};
use crate::core::ports::PortAllocator;
use crate::core::store::Store;
use crate::core::template_fs;
use chrono::Utc;
use locks::LockRegistry;
use remediation::{plan_for, RemediationAction, LOG_TAIL_LINES, MAX_CREATE_RETRIES, MAX_RESTART_LOOP_ATTEMPTS};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const RESTART_LOOP_SETTLE: Duration = Duration::from_secs(3);
const RESTART_LOOP_THRESHOLD: u32 = 3;
const START_POLL_ATTEMPTS: u32 = 8;
const START_POLL_INTERVAL: Duration = Duration::from_millis(1500);
const STOP_POLL_ATTEMPTS: u32 = 5;
const STOP_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Caller-supplied intent for a new cluster (spec §4.E "Create").
pub struct CreateClusterRequest {
    pub name: String,
    pub owner_id: String,
    pub template: String,
    pub limits: ResourceLimitsRequest,
    pub with_ftp: bool,
    pub health_max_recovery_attempts: u32,
    pub health_retry_interval_s: u64,
    pub health_cooldown_period_s: u64,
}

pub struct LifecycleController {
    store: Arc<dyn Store>,
    driver: Arc<dyn ContainerDriver>,
    ports: Arc<PortAllocator>,
    locks: LockRegistry,
    templates_base: PathBuf,
    clusters_base: PathBuf,
    defaults: ResourceLimits,
    metrics_pipeline: Arc<MetricsPipeline>,
}

impl LifecycleController {
    pub fn new(
        store: Arc<dyn Store>,
        driver: Arc<dyn ContainerDriver>,
        ports: Arc<PortAllocator>,
        templates_base: PathBuf,
        clusters_base: PathBuf,
        defaults: ResourceLimits,
        metrics_pipeline: Arc<MetricsPipeline>,
    ) -> Self {
        Self {
            store,
            driver,
            ports,
            locks: LockRegistry::new(),
            templates_base,
            clusters_base,
            defaults,
            metrics_pipeline,
        }
    }

    fn resolve_limits(&self, req: &ResourceLimitsRequest) -> ResourceLimits {
        ResourceLimits {
            cpu_cores: req.cpu_cores.unwrap_or(self.defaults.cpu_cores),
            memory_mib: req.memory_mib.unwrap_or(self.defaults.memory_mib),
            disk_gib: req.disk_gib.unwrap_or(self.defaults.disk_gib),
            network_mbps: req.network_mbps.unwrap_or(self.defaults.network_mbps),
        }
    }

    /// Generates `{base}-{template}-{yyyymmdd-HHMM}-{8-hex}`, retrying with
    /// a `-N` suffix on collision (spec §4.E step 3: names are globally
    /// unique).
    async fn generate_unique_name(&self, base: &str, template: &str) -> Result<String, ControlPlaneError> {
        let stamp = Utc::now().format("%Y%m%d-%H%M");
        let suffix = random_hex8();
        let candidate = format!("{base}-{template}-{stamp}-{suffix}");

        let existing = self.store.list_clusters().await?;
        let mut name = candidate;
        let mut n = 1;
        while existing.iter().any(|c| c.name == name) {
            name = format!("{base}-{template}-{stamp}-{suffix}-{n}");
            n += 1;
        }
        Ok(name)
    }

    /// Creates a new cluster end to end (spec §4.E "Create"): template
    /// lookup, port reservation, name generation, filesystem + compose
    /// materialization, persistence, then a remediated start attempt.
    pub async fn create(&self, req: CreateClusterRequest) -> Result<Cluster, ControlPlaneError> {
        let template_dir = self.templates_base.join(&req.template);
        if !tokio::fs::try_exists(&template_dir).await.unwrap_or(false) {
            return Err(ControlPlaneError::TemplateNotFound(req.template));
        }

        let port = self.ports.next_application_port().await?;
        let ftp_port = if req.with_ftp {
            Some(self.ports.next_ftp_port().await?)
        } else {
            None
        };

        let name = match self.generate_unique_name(&req.name, &req.template).await {
            Ok(n) => n,
            Err(e) => {
                self.ports.release(port);
                if let Some(p) = ftp_port {
                    self.ports.release(p);
                }
                return Err(e);
            }
        };

        let sanitized = sanitize_name(&name);
        let root_path = template_fs::cluster_root(&self.clusters_base, &sanitized);
        let limits = self.resolve_limits(&req.limits);

        let mut cluster = Cluster {
            id: ClusterId::new_v4(),
            name,
            root_path: root_path.to_string_lossy().into_owned(),
            port,
            ftp_port,
            ftp_username: req.with_ftp.then(|| "ftpuser".to_string()),
            ftp_password: req.with_ftp.then(|| random_hex8()),
            container_id: None,
            owner_id: req.owner_id,
            status: ClusterStatus::Created,
            limits,
            template: req.template,
            message: None,
        };

        template_fs::copy_template(&template_dir, &root_path).await?;
        template_fs::copy_scripts(&template_dir, &root_path).await?;

        let compose_path = root_path.join("docker-compose.yml");
        let template_yaml = template_fs::read_file(&template_dir.join("docker-compose.yml")).await?;
        let rewritten = compose::synthesize(
            &template_yaml,
            &ComposeParams {
                container_name: &sanitized,
                host_port: cluster.port,
                host_root: &cluster.root_path,
                limits: cluster.limits,
            },
        )?;
        template_fs::write_file(&compose_path, &rewritten).await?;

        self.store.insert_cluster(cluster.clone()).await?;
        self.store
            .upsert_health(HealthStatus::new(
                cluster.id,
                req.health_max_recovery_attempts,
                req.health_retry_interval_s,
                req.health_cooldown_period_s,
            ))
            .await?;

        let _guard = self.locks.acquire(cluster.id).await;
        match self.attempt_start(&compose_path, &sanitized, MAX_CREATE_RETRIES).await {
            Ok(()) => {
                let id = self.driver.resolve_id(&sanitized).await.ok().flatten();
                cluster.container_id = id;
                cluster.status = ClusterStatus::Running;
                cluster.message = None;
                self.store.update_cluster(cluster.clone()).await?;
                info!(cluster_id = %cluster.id, "cluster created and started");
            }
            Err(e) => {
                cluster.message = Some(truncate_for_storage(&e.to_string()));
                self.store.update_cluster(cluster.clone()).await?;
                warn!(cluster_id = %cluster.id, error = %e, "cluster created but failed to start; left CREATED for operator diagnosis");
            }
        }

        Ok(cluster)
    }

    async fn attempt_start(&self, compose_path: &PathBuf, sanitized_name: &str, retries_left: u32) -> Result<(), ControlPlaneError> {
        match self.driver.run(compose_path.to_string_lossy().as_ref()).await {
            Ok(()) => self.finish_start_sequence(compose_path, sanitized_name).await,
            Err(err) => self.remediate_or_fail(err, retries_left, compose_path, sanitized_name).await,
        }
    }

    fn remediate_or_fail<'a>(
        &'a self,
        err: RuntimeError,
        retries_left: u32,
        compose_path: &'a PathBuf,
        sanitized_name: &'a str,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), ControlPlaneError>> + Send + 'a>> {
        Box::pin(async move {
            if retries_left == 0 {
                return Err(ControlPlaneError::RuntimeExternal(err));
            }
            match plan_for(&err) {
                RemediationAction::Fatal => Err(ControlPlaneError::RuntimeExternal(err)),
                RemediationAction::PruneAndRetry => {
                    let _ = self.driver.prune_unused_networks().await;
                    self.attempt_start(compose_path, sanitized_name, retries_left - 1).await
                }
                RemediationAction::RetryOnly => self.attempt_start(compose_path, sanitized_name, retries_left - 1).await,
            }
        })
    }

    /// Polls for `running`, detecting and remediating a restart loop once
    /// (spec §4.E "Restart-loop guard").
    async fn finish_start_sequence(&self, compose_path: &PathBuf, sanitized_name: &str) -> Result<(), ControlPlaneError> {
        tokio::time::sleep(RESTART_LOOP_SETTLE).await;
        let inspect = self.driver.inspect(sanitized_name).await.map_err(ControlPlaneError::RuntimeExternal)?;
        if inspect.status_text == "restarting" || inspect.restart_count > RESTART_LOOP_THRESHOLD {
            warn!(cluster = sanitized_name, restart_count = inspect.restart_count, status = %inspect.status_text, "restart loop detected");
            self.remediate_restart_loop(compose_path, sanitized_name, MAX_RESTART_LOOP_ATTEMPTS).await?;
        }

        for _ in 0..START_POLL_ATTEMPTS {
            let inspect = self.driver.inspect(sanitized_name).await.map_err(ControlPlaneError::RuntimeExternal)?;
            if inspect.state == InspectState::Running {
                return Ok(());
            }
            tokio::time::sleep(START_POLL_INTERVAL).await;
        }

        let logs = self.driver.logs(sanitized_name, LOG_TAIL_LINES).await.unwrap_or_default();
        Err(ControlPlaneError::Internal(format!(
            "cluster did not reach running state; tail:\n{logs}"
        )))
    }

    /// Stops, removes, and prunes the restart-looping container, then
    /// recreates it from `compose_path` so the subsequent start poll has
    /// something to observe (spec §4.E "Restart-loop guard": stop, remove,
    /// prune, recreate).
    async fn remediate_restart_loop(&self, compose_path: &PathBuf, sanitized_name: &str, attempts_left: u32) -> Result<(), ControlPlaneError> {
        if attempts_left == 0 {
            return Ok(());
        }
        let _ = self.driver.stop(sanitized_name).await;
        let _ = self.driver.remove(sanitized_name).await;
        let _ = self.driver.prune_unused_networks().await;
        self.driver.invalidate_cache(sanitized_name);
        self.driver
            .run(compose_path.to_string_lossy().as_ref())
            .await
            .map_err(ControlPlaneError::RuntimeExternal)?;
        let _ = self.driver.resolve_id(sanitized_name).await;
        Ok(())
    }

    /// `start(cluster)` is compose-up-based, not a plain container-start,
    /// so a removed/recreated container is rematerialized (spec §4.E).
    pub async fn start(&self, cluster_id: ClusterId) -> Result<(), ControlPlaneError> {
        let _guard = self.locks.acquire(cluster_id).await;
        let mut cluster = self.load(cluster_id).await?;
        let sanitized = cluster.sanitized_name();
        let compose_path = PathBuf::from(&cluster.root_path).join("docker-compose.yml");

        self.attempt_start(&compose_path, &sanitized, MAX_CREATE_RETRIES).await?;

        cluster.container_id = self.driver.resolve_id(&sanitized).await.ok().flatten();
        cluster.status = ClusterStatus::Running;
        cluster.message = None;
        self.store.update_cluster(cluster).await
    }

    /// Direct stop of the resolved id/name, falling back to a compose-level
    /// stop, then polling for confirmation (spec §4.E "Start / Stop").
    pub async fn stop(&self, cluster_id: ClusterId) -> Result<(), ControlPlaneError> {
        let _guard = self.locks.acquire(cluster_id).await;
        let mut cluster = self.load(cluster_id).await?;
        let sanitized = cluster.sanitized_name();

        if self.driver.stop(&sanitized).await.is_err() {
            let compose_path = PathBuf::from(&cluster.root_path).join("docker-compose.yml");
            let _ = self.driver.run(compose_path.to_string_lossy().as_ref()).await;
            let _ = self.driver.stop(&sanitized).await;
        }

        for _ in 0..STOP_POLL_ATTEMPTS {
            let inspect = self.driver.inspect(&sanitized).await;
            match inspect {
                Ok(i) if i.state != InspectState::Running => break,
                Err(_) => break,
                _ => tokio::time::sleep(STOP_POLL_INTERVAL).await,
            }
        }

        cluster.status = ClusterStatus::Stopped;
        self.store.update_cluster(cluster).await
    }

    /// Admin-only mutation of resource limits; if the cluster is running,
    /// it is stopped, the compose is rewritten, then restarted
    /// (spec §4.E "Update resource limits").
    pub async fn update_limits(&self, cluster_id: ClusterId, limits: ResourceLimitsRequest) -> Result<(), ControlPlaneError> {
        let _guard = self.locks.acquire(cluster_id).await;
        let mut cluster = self.load(cluster_id).await?;
        let was_running = cluster.status == ClusterStatus::Running;
        cluster.limits = self.resolve_limits(&limits);

        let sanitized = cluster.sanitized_name();
        let compose_path = PathBuf::from(&cluster.root_path).join("docker-compose.yml");
        let template_dir = self.templates_base.join(&cluster.template);
        let template_yaml = template_fs::read_file(&template_dir.join("docker-compose.yml")).await?;
        let rewritten = compose::synthesize(
            &template_yaml,
            &ComposeParams {
                container_name: &sanitized,
                host_port: cluster.port,
                host_root: &cluster.root_path,
                limits: cluster.limits,
            },
        )?;
        template_fs::write_file(&compose_path, &rewritten).await?;

        if was_running {
            if let Err(e) = self.driver.stop(&sanitized).await {
                cluster.status = ClusterStatus::Error;
                cluster.message = Some(truncate_for_storage(&format!("partial limit update, stop failed: {e}")));
                self.store.update_cluster(cluster).await?;
                return Err(ControlPlaneError::RuntimeExternal(e));
            }
            let _ = self.driver.prune_unused_networks().await;
            if let Err(e) = self.attempt_start(&compose_path, &sanitized, MAX_CREATE_RETRIES).await {
                cluster.status = ClusterStatus::Error;
                cluster.message = Some(truncate_for_storage(&format!("partial limit update, restart failed: {e}")));
                self.store.update_cluster(cluster).await?;
                return Err(e);
            }
            cluster.container_id = self.driver.resolve_id(&sanitized).await.ok().flatten();
            cluster.status = ClusterStatus::Running;
        }

        cluster.message = None;
        self.store.update_cluster(cluster).await
    }

    /// Tears a cluster down (spec §4.E "Delete"): mark deleting, cascade
    /// the store rows, remove the container and directory, then unmark.
    pub async fn delete(&self, cluster_id: ClusterId) -> Result<(), ControlPlaneError> {
        let _guard = self.locks.acquire(cluster_id).await;
        let cluster = self.load(cluster_id).await?;

        self.metrics_pipeline.begin_deleting(cluster_id);

        let sanitized = cluster.sanitized_name();
        if let Ok(Some(id)) = self.driver.resolve_id(&sanitized).await {
            let _ = self.driver.remove(&id).await;
            self.driver.invalidate_cache(&sanitized);
        }

        template_fs::remove_dir(std::path::Path::new(&cluster.root_path)).await?;
        self.ports.release(cluster.port);
        if let Some(p) = cluster.ftp_port {
            self.ports.release(p);
        }

        self.store.delete_cluster(cluster_id).await?;
        self.metrics_pipeline.finish_deleting(cluster_id);
        Ok(())
    }

    async fn load(&self, cluster_id: ClusterId) -> Result<Cluster, ControlPlaneError> {
        self.store
            .get_cluster(cluster_id)
            .await?
            .ok_or_else(|| ControlPlaneError::ClusterNotFound(cluster_id.to_string()))
    }
}

fn random_hex8() -> String {
    let mut buf = [0u8; 4];
    getrandom::getrandom(&mut buf).expect("system RNG unavailable");
    hex::encode(buf)
}
