// src/core/lifecycle/locks.rs

//! Per-cluster advisory locks serializing lifecycle mutations (spec §4.E
//! "concurrency discipline"), grounded on the teacher's
//! `reconfigurations_in_progress: DashMap<SocketAddr, Arc<Mutex<()>>>`
//! pattern in `warden/worker.rs`.

use crate::core::model::ClusterId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Hands out a per-cluster `tokio::sync::Mutex<()>`, created lazily and
/// kept for the process lifetime (entries are cheap and few relative to
/// cluster count). Cross-cluster operations proceed in parallel; only
/// operations against the same cluster id serialize against each other.
#[derive(Default)]
pub struct LockRegistry {
    locks: DashMap<ClusterId, Arc<Mutex<()>>>,
}

impl LockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, cluster_id: ClusterId) -> Arc<Mutex<()>> {
        self.locks.entry(cluster_id).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Acquires the cluster's lock, holding it until the returned guard is
    /// dropped.
    pub async fn acquire(&self, cluster_id: ClusterId) -> OwnedMutexGuard<()> {
        self.entry(cluster_id).lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn same_cluster_serializes() {
        let registry = Arc::new(LockRegistry::new());
        let id = ClusterId::new_v4();
        let order = Arc::new(Mutex::new(Vec::new()));

        let r1 = registry.clone();
        let o1 = order.clone();
        let h1 = tokio::spawn(async move {
            let _g = r1.acquire(id).await;
            o1.lock().await.push(1);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            o1.lock().await.push(2);
        });

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;

        let r2 = registry.clone();
        let o2 = order.clone();
        let h2 = tokio::spawn(async move {
            let _g = r2.acquire(id).await;
            o2.lock().await.push(3);
        });

        h1.await.unwrap();
        h2.await.unwrap();
        assert_eq!(*order.lock().await, vec![1, 2, 3]);
    }
}
