// src/server/metrics_server.rs

//! Serves the Prometheus `/metrics` endpoint on its own port (spec §10.5:
//! ambient observability, carried despite the REST-layer Non-goal).

use crate::core::metrics::{gather_metrics, CLUSTERS_BY_STATUS};
use crate::core::model::ClusterStatus;
use crate::core::state::AppState;
use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info};

async fn metrics_handler(state: Arc<AppState>) -> impl IntoResponse {
    if let Ok(clusters) = state.store.list_clusters().await {
        for status in [
            ClusterStatus::Created,
            ClusterStatus::Running,
            ClusterStatus::Stopped,
            ClusterStatus::Error,
            ClusterStatus::Deleted,
        ] {
            let count = clusters.iter().filter(|c| c.status == status).count();
            CLUSTERS_BY_STATUS.with_label_values(&[&status.to_string()]).set(count as f64);
        }
    }

    let body = gather_metrics();
    (StatusCode::OK, [("content-type", "text/plain; version=0.0.4")], body)
}

pub async fn run_metrics_server(state: Arc<AppState>, mut shutdown_rx: broadcast::Receiver<()>) {
    let port = state.config.metrics.port;
    let app = Router::new().route("/metrics", get(move || metrics_handler(state.clone())));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Prometheus metrics server listening on http://{addr}/metrics");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(%port, error = %e, "failed to bind metrics server");
            return;
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_rx.recv().await.ok();
            info!("metrics server shutting down");
        })
        .await
        .unwrap();
}
