// src/server/initialization.rs

//! Builds the [`ServerContext`]: loads no further config (the caller already
//! parsed it), constructs [`AppState`], and prepares the shutdown channel.

use super::context::ServerContext;
use crate::config::Config;
use crate::core::state::AppState;
use anyhow::Result;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::info;

pub async fn setup(config: Config) -> Result<ServerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let state = AppState::initialize(config).await?;

    Ok(ServerContext {
        state,
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}

fn log_startup_info(config: &Config) {
    info!(
        host = %config.server.host,
        port = config.server.port,
        clusters_base = %config.server.clusters_base_dir,
        templates_base = %config.server.templates_base_dir,
        "starting clusterforge control plane"
    );
    if !config.metrics.enabled {
        info!("Prometheus metrics server is disabled in the configuration.");
    }
    if !config.backup.enabled {
        info!("backup subsystem is disabled; NullBackupService will refuse every backup request.");
    }
}
