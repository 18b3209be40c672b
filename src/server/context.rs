// src/server/context.rs

use crate::core::state::AppState;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinSet;

/// Holds everything the main loop needs once setup has run: the shared
/// state, a shutdown signal every background worker subscribes to, and the
/// `JoinSet` those workers are spawned into.
pub struct ServerContext {
    pub state: Arc<AppState>,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<()>,
}
