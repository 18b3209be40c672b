// src/core/backup/mod.rs

//! The backup subsystem's external contract (spec §4.J). Deliberately kept
//! off the hot path: the lifecycle controller, health engine, and metrics
//! pipeline never block on a `BackupService` call.

use crate::core::errors::ControlPlaneError;
use crate::core::model::ClusterId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BackupType {
    Full,
    Incremental,
    ConfigOnly,
    DataOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BackupStatus {
    InProgress,
    Completed,
    Failed,
    Corrupted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: Uuid,
    pub cluster_id: ClusterId,
    pub backup_type: BackupType,
    pub status: BackupStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub size_bytes: Option<u64>,
    pub storage_location: Option<String>,
    pub error_message: Option<String>,
}

/// The contract an external backup implementation fulfills (spec §4.J:
/// "out of hot path"). No in-tree implementation ships; callers that don't
/// configure one get [`NullBackupService`].
#[async_trait]
pub trait BackupService: Send + Sync {
    async fn start_backup(&self, cluster_id: ClusterId, backup_type: BackupType) -> Result<BackupRecord, ControlPlaneError>;
    async fn restore(&self, backup_id: Uuid) -> Result<(), ControlPlaneError>;
}

/// A no-op backend used when no backup integration is configured
/// (spec §10.5's "ambient stack regardless of feature scope" still applies
/// to logging: this impl logs every call it refuses to honor).
pub struct NullBackupService;

#[async_trait]
impl BackupService for NullBackupService {
    async fn start_backup(&self, cluster_id: ClusterId, backup_type: BackupType) -> Result<BackupRecord, ControlPlaneError> {
        tracing::warn!(%cluster_id, ?backup_type, "backup requested but no BackupService is configured");
        Err(ControlPlaneError::Internal("no backup service configured".to_string()))
    }

    async fn restore(&self, backup_id: Uuid) -> Result<(), ControlPlaneError> {
        tracing::warn!(%backup_id, "restore requested but no BackupService is configured");
        Err(ControlPlaneError::Internal("no backup service configured".to_string()))
    }
}
