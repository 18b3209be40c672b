// src/server/spawner.rs

//! Spawns every long-running background worker into the server's
//! `JoinSet`, each on its own fixed-delay ticker (spec §5).

use super::context::ServerContext;
use super::metrics_server;
use crate::core::health::{CHECK_INTERVAL, RECOVERY_SCAN_INTERVAL};
use crate::core::metrics_pipeline::{DRAIN_INTERVAL, SAMPLE_INTERVAL};
use crate::core::model::ClusterStatus;
use crate::core::scheduler::spawn_fixed_delay;
use crate::core::store::Store;
use anyhow::Result;
use std::time::Duration;
use tracing::info;

const VALID_ID_REFRESH_INTERVAL: Duration = Duration::from_secs(30);
const BUS_PURGE_INTERVAL: Duration = Duration::from_secs(120);

/// Spawns all background workers into `ctx.background_tasks`, each
/// subscribing its own receiver off `ctx.shutdown_tx` (spec §5 idiom).
pub async fn spawn_all(ctx: &mut ServerContext) -> Result<()> {
    let state = ctx.state.clone();
    let shutdown_tx = &ctx.shutdown_tx;
    let tasks = &mut ctx.background_tasks;

    if state.config.metrics.enabled {
        let metrics_state = state.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.spawn(async move {
            metrics_server::run_metrics_server(metrics_state, shutdown_rx).await;
        });
    }

    {
        let state = state.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.spawn(async move {
            spawn_fixed_delay("health_check", CHECK_INTERVAL, shutdown_rx, || {
                let state = state.clone();
                async move { state.health.check_tick().await }
            })
            .await;
        });
    }

    {
        let state = state.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.spawn(async move {
            spawn_fixed_delay("recovery_scan", RECOVERY_SCAN_INTERVAL, shutdown_rx, || {
                let state = state.clone();
                async move { state.health.recovery_scan().await }
            })
            .await;
        });
    }

    {
        let state = state.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.spawn(async move {
            spawn_fixed_delay("metrics_sample", SAMPLE_INTERVAL, shutdown_rx, || {
                let state = state.clone();
                async move {
                    let clusters = state.health.active_list_cache.get().await;
                    let running: Vec<_> = clusters.into_iter().filter(|c| c.status == ClusterStatus::Running).collect();
                    state.metrics_pipeline.sample_tick(&running).await;
                }
            })
            .await;
        });
    }

    {
        let state = state.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.spawn(async move {
            spawn_fixed_delay("metrics_drain", DRAIN_INTERVAL, shutdown_rx, || {
                let state = state.clone();
                async move { state.metrics_pipeline.drain().await }
            })
            .await;
        });
    }

    {
        let state = state.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.spawn(async move {
            spawn_fixed_delay("metrics_valid_ids_refresh", VALID_ID_REFRESH_INTERVAL, shutdown_rx, || {
                let state = state.clone();
                async move { state.metrics_pipeline.refresh_valid_ids().await }
            })
            .await;
        });
    }

    {
        let state = state.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.spawn(async move {
            spawn_fixed_delay("ftp_reconcile", crate::core::ftp::RECONCILE_INTERVAL, shutdown_rx, || {
                let state = state.clone();
                async move {
                    let clusters = match state.store.list_clusters().await {
                        Ok(c) => c,
                        Err(_) => return,
                    };
                    let ftp_clusters: Vec<_> = clusters.into_iter().filter(|c| c.has_ftp()).collect();
                    state.ftp.reconcile(&ftp_clusters).await;
                }
            })
            .await;
        });
    }

    {
        let state = state.clone();
        let shutdown_rx = shutdown_tx.subscribe();
        tasks.spawn(async move {
            spawn_fixed_delay("bus_purge", BUS_PURGE_INTERVAL, shutdown_rx, || {
                let state = state.clone();
                async move {
                    state.bus.purge_empty_channels();
                }
            })
            .await;
        });
    }

    info!("all background tasks have been spawned");
    Ok(())
}
