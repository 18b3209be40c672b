// src/core/store/memory.rs

//! Reference `Store` implementation backed by `DashMap`s (spec §6).
//! Suitable for tests and single-process deployments; a durable backend
//! implements the same trait for production use.

use super::Store;
use crate::core::backup::BackupRecord;
use crate::core::errors::ControlPlaneError;
use crate::core::model::{Cluster, ClusterId, HealthMetric, HealthStatus};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryStore {
    clusters: DashMap<ClusterId, Cluster>,
    health: DashMap<ClusterId, HealthStatus>,
    /// Append-only per-cluster metric history; `Vec` models the schema's
    /// lack of a unique constraint on `cluster_id` (spec §9 decision 1).
    metrics: DashMap<ClusterId, Mutex<Vec<HealthMetric>>>,
    backups: DashMap<Uuid, BackupRecord>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn insert_cluster(&self, cluster: Cluster) -> Result<(), ControlPlaneError> {
        self.clusters.insert(cluster.id, cluster);
        Ok(())
    }

    async fn get_cluster(&self, id: ClusterId) -> Result<Option<Cluster>, ControlPlaneError> {
        Ok(self.clusters.get(&id).map(|c| c.clone()))
    }

    async fn update_cluster(&self, cluster: Cluster) -> Result<(), ControlPlaneError> {
        if !self.clusters.contains_key(&cluster.id) {
            return Err(ControlPlaneError::ClusterNotFound(cluster.id.to_string()));
        }
        self.clusters.insert(cluster.id, cluster);
        Ok(())
    }

    async fn list_clusters(&self) -> Result<Vec<Cluster>, ControlPlaneError> {
        Ok(self.clusters.iter().map(|e| e.value().clone()).collect())
    }

    async fn list_clusters_by_owner(&self, owner_id: &str) -> Result<Vec<Cluster>, ControlPlaneError> {
        Ok(self
            .clusters
            .iter()
            .filter(|e| e.value().owner_id == owner_id)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn delete_cluster(&self, id: ClusterId) -> Result<(), ControlPlaneError> {
        self.clusters.remove(&id);
        self.health.remove(&id);
        self.metrics.remove(&id);
        Ok(())
    }

    async fn get_health(&self, cluster_id: ClusterId) -> Result<Option<HealthStatus>, ControlPlaneError> {
        Ok(self.health.get(&cluster_id).map(|h| h.clone()))
    }

    async fn upsert_health(&self, status: HealthStatus) -> Result<(), ControlPlaneError> {
        self.health.insert(status.cluster_id, status);
        Ok(())
    }

    async fn append_metric(&self, metric: HealthMetric) -> Result<(), ControlPlaneError> {
        self.metrics
            .entry(metric.cluster_id)
            .or_insert_with(|| Mutex::new(Vec::new()))
            .lock()
            .push(metric);
        Ok(())
    }

    async fn latest_metric(&self, cluster_id: ClusterId) -> Result<Option<HealthMetric>, ControlPlaneError> {
        Ok(self.metrics.get(&cluster_id).and_then(|v| v.lock().last().cloned()))
    }

    async fn recent_metrics(&self, cluster_id: ClusterId, limit: usize) -> Result<Vec<HealthMetric>, ControlPlaneError> {
        Ok(self
            .metrics
            .get(&cluster_id)
            .map(|v| {
                let guard = v.lock();
                let len = guard.len();
                let start = len.saturating_sub(limit);
                guard[start..].to_vec()
            })
            .unwrap_or_default())
    }

    async fn insert_backup(&self, record: BackupRecord) -> Result<(), ControlPlaneError> {
        self.backups.insert(record.id, record);
        Ok(())
    }

    async fn get_backup(&self, id: Uuid) -> Result<Option<BackupRecord>, ControlPlaneError> {
        Ok(self.backups.get(&id).map(|b| b.clone()))
    }

    async fn list_backups(&self, cluster_id: ClusterId) -> Result<Vec<BackupRecord>, ControlPlaneError> {
        Ok(self
            .backups
            .iter()
            .filter(|e| e.value().cluster_id == cluster_id)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn update_backup(&self, record: BackupRecord) -> Result<(), ControlPlaneError> {
        if !self.backups.contains_key(&record.id) {
            return Err(ControlPlaneError::BackupNotFound(record.id.to_string()));
        }
        self.backups.insert(record.id, record);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::{ClusterStatus, ResourceLimits};

    fn sample_cluster() -> Cluster {
        Cluster {
            id: Uuid::new_v4(),
            name: "alice_phpapp".to_string(),
            root_path: "/srv/clusters/alice_phpapp".to_string(),
            port: 20001,
            ftp_port: None,
            ftp_username: None,
            ftp_password: None,
            container_id: None,
            owner_id: "alice".to_string(),
            status: ClusterStatus::Created,
            limits: ResourceLimits {
                cpu_cores: 1.0,
                memory_mib: 512,
                disk_gib: 5,
                network_mbps: 100,
            },
            template: "php_web".to_string(),
            message: None,
        }
    }

    #[tokio::test]
    async fn delete_cascades_health_and_metrics() {
        let store = InMemoryStore::new();
        let cluster = sample_cluster();
        let id = cluster.id;
        store.insert_cluster(cluster).await.unwrap();
        store.upsert_health(HealthStatus::new(id, 3, 30, 300)).await.unwrap();
        store.append_metric(HealthMetric::zero(id, 512.0)).await.unwrap();

        store.delete_cluster(id).await.unwrap();

        assert!(store.get_cluster(id).await.unwrap().is_none());
        assert!(store.get_health(id).await.unwrap().is_none());
        assert!(store.recent_metrics(id, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn metrics_append_without_unique_constraint() {
        let store = InMemoryStore::new();
        let id = Uuid::new_v4();
        store.append_metric(HealthMetric::zero(id, 512.0)).await.unwrap();
        store.append_metric(HealthMetric::zero(id, 512.0)).await.unwrap();
        assert_eq!(store.recent_metrics(id, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn update_missing_cluster_is_an_error() {
        let store = InMemoryStore::new();
        assert!(store.update_cluster(sample_cluster()).await.is_err());
    }
}
