// src/core/health/cache.rs

//! TTL-bounded, single-writer caches for health status and the active
//! cluster list (spec §4.G "Caching"). Double-checked locking avoids a
//! stampede of concurrent reloaders on expiry.

use crate::core::model::{Cluster, ClusterId, HealthStatus};
use crate::core::store::Store;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

const HEALTH_STATUS_TTL: Duration = Duration::from_secs(5);
const ACTIVE_LIST_TTL: Duration = Duration::from_secs(10);

/// Process-level cache of `HealthStatus` per cluster, bulk-reloaded under
/// a single-writer lock on expiry (spec §4.G).
pub struct HealthStatusCache {
    store: Arc<dyn Store>,
    entries: DashMap<ClusterId, (HealthStatus, Instant)>,
    reload_lock: Mutex<()>,
    last_bulk_load: Mutex<Option<Instant>>,
}

impl HealthStatusCache {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            entries: DashMap::new(),
            reload_lock: Mutex::new(()),
            last_bulk_load: Mutex::new(None),
        }
    }

    /// Returns the cached status for `cluster_id`, bulk-reloading from the
    /// store if the cache is stale. Double-checked: a second caller that
    /// loses the race to acquire `reload_lock` re-checks freshness before
    /// reloading again.
    pub async fn get(&self, cluster_id: ClusterId) -> Option<HealthStatus> {
        if self.is_fresh().await {
            return self.entries.get(&cluster_id).map(|e| e.0.clone());
        }

        let _guard = self.reload_lock.lock().await;
        if self.is_fresh().await {
            return self.entries.get(&cluster_id).map(|e| e.0.clone());
        }

        self.reload_all().await;
        self.entries.get(&cluster_id).map(|e| e.0.clone())
    }

    /// Invalidates a single entry, e.g. right after the health engine
    /// persists a fresh status, so the next read is never stale by more
    /// than this write (spec §9 decision 2: writes never flow through the
    /// cache).
    pub fn invalidate(&self, cluster_id: ClusterId) {
        self.entries.remove(&cluster_id);
    }

    async fn is_fresh(&self) -> bool {
        matches!(*self.last_bulk_load.lock().await, Some(at) if at.elapsed() < HEALTH_STATUS_TTL)
    }

    async fn reload_all(&self) {
        let clusters = match self.store.list_clusters().await {
            Ok(c) => c,
            Err(_) => return,
        };
        for cluster in clusters {
            if let Ok(Some(status)) = self.store.get_health(cluster.id).await {
                self.entries.insert(cluster.id, (status, Instant::now()));
            }
        }
        *self.last_bulk_load.lock().await = Some(Instant::now());
    }
}

/// Process-level cache of the active cluster list, reloaded with a
/// join-fetch of owner to avoid N+1 (spec §4.G).
pub struct ActiveClusterListCache {
    store: Arc<dyn Store>,
    entries: Mutex<(Vec<Cluster>, Option<Instant>)>,
}

impl ActiveClusterListCache {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            entries: Mutex::new((Vec::new(), None)),
        }
    }

    pub async fn get(&self) -> Vec<Cluster> {
        let mut guard = self.entries.lock().await;
        if matches!(guard.1, Some(at) if at.elapsed() < ACTIVE_LIST_TTL) {
            return guard.0.clone();
        }
        if let Ok(clusters) = self.store.list_clusters().await {
            guard.0 = clusters;
            guard.1 = Some(Instant::now());
        }
        guard.0.clone()
    }
}
