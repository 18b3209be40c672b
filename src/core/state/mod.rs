// src/core/state/mod.rs

//! The composition root's shared state: every long-lived subsystem wired
//! together once at startup and handed to each background worker as an
//! `Arc<AppState>`, grounded on the teacher's `ServerState`/`ServerInit`
//! split.

use crate::config::Config;
use crate::core::backup::{BackupService, NullBackupService};
use crate::core::bus::MetricsBus;
use crate::core::driver::{CliContainerDriver, ContainerDriver};
use crate::core::health::HealthEngine;
use crate::core::lifecycle::LifecycleController;
use crate::core::ftp::FtpSidecarManager;
use crate::core::metrics_pipeline::MetricsPipeline;
use crate::core::model::ResourceLimits;
use crate::core::store::memory::InMemoryStore;
use crate::core::store::Store;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// All shared, long-lived subsystems, built once by [`AppState::initialize`]
/// and shared by every background worker and the metrics HTTP server.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn Store>,
    pub driver: Arc<dyn ContainerDriver>,
    pub bus: Arc<MetricsBus>,
    pub lifecycle: Arc<LifecycleController>,
    pub health: Arc<HealthEngine>,
    pub metrics_pipeline: Arc<MetricsPipeline>,
    pub ftp: Arc<FtpSidecarManager>,
    pub backup: Arc<dyn BackupService>,
}

impl AppState {
    /// Builds every subsystem from a validated [`Config`] (spec §10.3,
    /// §10.4). Ensures the clusters/templates base directories exist before
    /// returning, matching the teacher's directory-preparation steps in
    /// `server::initialization::setup`.
    pub async fn initialize(config: Config) -> Result<Arc<Self>> {
        let clusters_base = PathBuf::from(&config.server.clusters_base_dir);
        let templates_base = PathBuf::from(&config.server.templates_base_dir);
        tokio::fs::create_dir_all(&clusters_base).await?;
        tokio::fs::create_dir_all(&templates_base).await?;

        let store: Arc<dyn Store> = Arc::new(InMemoryStore::default());
        let driver: Arc<dyn ContainerDriver> = Arc::new(CliContainerDriver::new(config.server.container_binary.clone()));
        let ports = Arc::new(crate::core::ports::PortAllocator::with_store(store.clone()));
        let bus = Arc::new(MetricsBus::new());
        let backup: Arc<dyn BackupService> = Arc::new(NullBackupService);

        let defaults = ResourceLimits {
            cpu_cores: config.defaults.cpu_cores,
            memory_mib: config.defaults.memory_mib,
            disk_gib: config.defaults.disk_gib,
            network_mbps: config.defaults.network_mbps,
        };

        let metrics_pipeline = Arc::new(MetricsPipeline::new(driver.clone(), store.clone(), bus.clone()));

        let lifecycle = Arc::new(LifecycleController::new(
            store.clone(),
            driver.clone(),
            ports.clone(),
            templates_base,
            clusters_base,
            defaults,
            metrics_pipeline.clone(),
        ));

        let health = Arc::new(HealthEngine::new(store.clone(), driver.clone(), lifecycle.clone()));

        let ftp = Arc::new(FtpSidecarManager::new(driver.clone(), ports.clone(), config.ftp.image.clone()));

        info!("application state initialized");

        Ok(Arc::new(Self {
            config,
            store,
            driver,
            bus,
            lifecycle,
            health,
            metrics_pipeline,
            ftp,
            backup,
        }))
    }
}
