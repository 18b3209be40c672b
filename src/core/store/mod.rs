// src/core/store/mod.rs

//! Persistence boundary for clusters, health status, metrics, and backups
//! (spec §6). The only implementation shipped here is an in-memory store;
//! a durable backend implements the same trait.

pub mod memory;

use crate::core::backup::BackupRecord;
use crate::core::errors::ControlPlaneError;
use crate::core::model::{Cluster, ClusterId, HealthMetric, HealthStatus};
use async_trait::async_trait;

/// The schema from spec §6, expressed as an async trait so the lifecycle
/// controller, health engine, and metrics pipeline never depend on a
/// concrete backend.
#[async_trait]
pub trait Store: Send + Sync {
    async fn insert_cluster(&self, cluster: Cluster) -> Result<(), ControlPlaneError>;
    async fn get_cluster(&self, id: ClusterId) -> Result<Option<Cluster>, ControlPlaneError>;
    async fn update_cluster(&self, cluster: Cluster) -> Result<(), ControlPlaneError>;
    async fn list_clusters(&self) -> Result<Vec<Cluster>, ControlPlaneError>;
    async fn list_clusters_by_owner(&self, owner_id: &str) -> Result<Vec<Cluster>, ControlPlaneError>;
    /// Deletes the cluster row and, per `ON DELETE CASCADE` semantics
    /// (spec §6), its health status and metric history.
    async fn delete_cluster(&self, id: ClusterId) -> Result<(), ControlPlaneError>;

    async fn get_health(&self, cluster_id: ClusterId) -> Result<Option<HealthStatus>, ControlPlaneError>;
    async fn upsert_health(&self, status: HealthStatus) -> Result<(), ControlPlaneError>;

    /// Appends a metric sample. `cluster_health_metrics` has no unique
    /// constraint on `cluster_id` (spec §6, §9 Open Question 1): this is
    /// an append, never an upsert.
    async fn append_metric(&self, metric: HealthMetric) -> Result<(), ControlPlaneError>;
    async fn latest_metric(&self, cluster_id: ClusterId) -> Result<Option<HealthMetric>, ControlPlaneError>;
    async fn recent_metrics(&self, cluster_id: ClusterId, limit: usize) -> Result<Vec<HealthMetric>, ControlPlaneError>;

    async fn insert_backup(&self, record: BackupRecord) -> Result<(), ControlPlaneError>;
    async fn get_backup(&self, id: uuid::Uuid) -> Result<Option<BackupRecord>, ControlPlaneError>;
    async fn list_backups(&self, cluster_id: ClusterId) -> Result<Vec<BackupRecord>, ControlPlaneError>;
    async fn update_backup(&self, record: BackupRecord) -> Result<(), ControlPlaneError>;
}
