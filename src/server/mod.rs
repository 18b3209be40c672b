// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;
use tracing::info;

mod context;
mod initialization;
mod metrics_server;
mod spawner;

/// The main server startup function: builds state, spawns every background
/// worker, then waits for Ctrl-C before broadcasting shutdown and joining
/// every task (spec §5 composition root).
pub async fn run(config: Config) -> Result<()> {
    let mut ctx = initialization::setup(config).await?;

    spawner::spawn_all(&mut ctx).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = ctx.shutdown_tx.send(());

    while ctx.background_tasks.join_next().await.is_some() {}
    info!("all background tasks stopped");

    Ok(())
}
