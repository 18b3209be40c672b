// src/core/scheduler.rs

//! A shared fixed-delay ticker helper used by every periodic worker (health
//! checks, metrics sampling, FTP reconciliation, the metrics bus throttle
//! flush). Fixed delay, not fixed rate (spec §5): the next tick is scheduled
//! only after the previous iteration's body has finished, so a slow cycle
//! never causes ticks to pile up.

use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

/// Runs `body` every `delay`, stopping as soon as `shutdown_rx` fires.
/// `body` receives no arguments; callers close over whatever state they
/// need. `task_name` is used only for the start/stop log lines.
pub async fn spawn_fixed_delay<F, Fut>(
    task_name: &str,
    delay: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
    mut body: F,
) where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = ()> + Send,
{
    info!(task = task_name, "periodic task started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {
                body().await;
            }
            _ = shutdown_rx.recv() => {
                info!(task = task_name, "periodic task shutting down");
                return;
            }
        }
    }
}
