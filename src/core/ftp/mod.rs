// src/core/ftp/mod.rs

//! The FTP Sidecar Manager (spec §4.F). Each cluster with FTP credentials
//! owns one independently-lifecycled `ftp_{sanitized-name}` container: its
//! state does not follow the cluster's RUNNING/STOPPED status.

use crate::core::compose::{self, FtpComposeParams};
use crate::core::driver::{ContainerDriver, InspectState};
use crate::core::errors::{ControlPlaneError, RuntimeError};
use crate::core::model::Cluster;
use crate::core::ports::PortAllocator;
use crate::core::template_fs;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

const TTL_CACHE_DURATION: Duration = Duration::from_secs(30);
pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(60);
const PASV_WAIT: Duration = Duration::from_secs(5);
const RECREATE_SETTLE: Duration = Duration::from_millis(500);

/// Manages FTP sidecar containers, independent of each cluster's own
/// RUNNING/STOPPED status (spec §4.F "Independence invariant").
pub struct FtpSidecarManager {
    driver: Arc<dyn ContainerDriver>,
    ports: Arc<PortAllocator>,
    ftp_image: String,
    last_checked: DashMap<String, Instant>,
}

impl FtpSidecarManager {
    pub fn new(driver: Arc<dyn ContainerDriver>, ports: Arc<PortAllocator>, ftp_image: impl Into<String>) -> Self {
        Self {
            driver,
            ports,
            ftp_image: ftp_image.into(),
            last_checked: DashMap::new(),
        }
    }

    /// Starts the sidecar if not already running, removing any stale
    /// same-name container first (spec §4.F).
    pub async fn create_or_start(&self, cluster: &Cluster) -> Result<(), ControlPlaneError> {
        if !cluster.has_ftp() {
            return Ok(());
        }
        let name = cluster.ftp_container_name();

        if let Ok(inspect) = self.driver.inspect(&name).await {
            if inspect.state == InspectState::Running {
                return Ok(());
            }
            if inspect.state == InspectState::Stopped {
                let _ = self.driver.remove(&name).await;
                tokio::time::sleep(RECREATE_SETTLE).await;
            }
        }

        self.run_sidecar(cluster, &name).await
    }

    async fn run_sidecar(&self, cluster: &Cluster, name: &str) -> Result<(), ControlPlaneError> {
        let ftp_port = cluster.ftp_port.ok_or_else(|| ControlPlaneError::Validation("cluster has no FTP port".to_string()))?;
        let username = cluster
            .ftp_username
            .as_deref()
            .ok_or_else(|| ControlPlaneError::Validation("cluster has no FTP username".to_string()))?;
        let password = cluster
            .ftp_password
            .as_deref()
            .ok_or_else(|| ControlPlaneError::Validation("cluster has no FTP password".to_string()))?;
        self.ports.wait_for_pasv_window_free(ftp_port, PASV_WAIT).await;

        let (pasv_min, pasv_max) = self.ports.pasv_window_for(ftp_port);
        let compose_yaml = compose::synthesize_ftp(&FtpComposeParams {
            container_name: name,
            image: &self.ftp_image,
            host_root: &cluster.root_path,
            ftp_port,
            pasv_min,
            pasv_max,
            username,
            password,
        });
        let compose_path = std::path::Path::new(&cluster.root_path).join("ftp-compose.yml");
        template_fs::write_file(&compose_path, &compose_yaml).await?;

        match self.driver.run(compose_path.to_string_lossy().as_ref()).await {
            Ok(()) => {
                info!(cluster_id = %cluster.id, ftp_container = name, "FTP sidecar started");
                Ok(())
            }
            Err(e) if is_conflict(&e) => {
                warn!(cluster_id = %cluster.id, "FTP sidecar port conflict, forcing recreate");
                let _ = self.driver.remove(name).await;
                self.ports.wait_for_pasv_window_free(ftp_port, PASV_WAIT).await;
                self.driver.run(compose_path.to_string_lossy().as_ref()).await.map_err(ControlPlaneError::RuntimeExternal)
            }
            Err(e) => Err(ControlPlaneError::RuntimeExternal(e)),
        }
    }

    pub async fn stop(&self, cluster: &Cluster) -> Result<(), ControlPlaneError> {
        if !cluster.has_ftp() {
            return Ok(());
        }
        let _ = self.driver.stop(&cluster.ftp_container_name()).await;
        Ok(())
    }

    pub async fn remove(&self, cluster: &Cluster) -> Result<(), ControlPlaneError> {
        if !cluster.has_ftp() {
            return Ok(());
        }
        let name = cluster.ftp_container_name();
        let _ = self.driver.remove(&name).await;
        self.driver.invalidate_cache(&name);
        self.last_checked.remove(&name);
        Ok(())
    }

    /// No-op if the cluster lacks FTP config; otherwise starts the
    /// sidecar if it is not already running (spec §4.F).
    pub async fn ensure_running(&self, cluster: &Cluster) -> Result<(), ControlPlaneError> {
        if !cluster.has_ftp() {
            return Ok(());
        }
        let name = cluster.ftp_container_name();
        if let Some(last) = self.last_checked.get(&name) {
            if last.elapsed() < TTL_CACHE_DURATION {
                return Ok(());
            }
        }
        self.last_checked.insert(name, Instant::now());
        self.create_or_start(cluster).await
    }

    /// Periodic reconciler body, run every [`RECONCILE_INTERVAL`]
    /// (spec §4.F).
    pub async fn reconcile(&self, ftp_clusters: &[Cluster]) {
        for cluster in ftp_clusters {
            if let Err(e) = self.ensure_running(cluster).await {
                warn!(cluster_id = %cluster.id, error = %e, "FTP reconcile failed");
            }
        }
    }
}

fn is_conflict(err: &RuntimeError) -> bool {
    matches!(err, RuntimeError::PortConflict(_)) || err.to_string().to_lowercase().contains("conflict")
}
