// src/core/model.rs

//! The data model shared by the lifecycle controller, health engine, and
//! metrics pipeline (spec §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use uuid::Uuid;

pub type ClusterId = Uuid;

/// Lifecycle status of a `Cluster` (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ClusterStatus {
    Created,
    Running,
    Stopped,
    Error,
    Deleted,
}

impl std::fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ClusterStatus::Created => "CREATED",
            ClusterStatus::Running => "RUNNING",
            ClusterStatus::Stopped => "STOPPED",
            ClusterStatus::Error => "ERROR",
            ClusterStatus::Deleted => "DELETED",
        };
        write!(f, "{s}")
    }
}

/// Per-cluster resource limits. Each field is nullable at the API boundary;
/// process-wide defaults are applied exactly once, at creation (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpu_cores: f64,
    pub memory_mib: u64,
    pub disk_gib: u64,
    pub network_mbps: u64,
}

/// A caller-supplied, possibly-partial set of resource limits. `None` fields
/// are filled in from [`crate::config::DefaultsConfig`] at creation time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimitsRequest {
    pub cpu_cores: Option<f64>,
    pub memory_mib: Option<u64>,
    pub disk_gib: Option<u64>,
    pub network_mbps: Option<u64>,
}

/// One user-visible container plus its filesystem root and (optionally) an
/// FTP sidecar (spec §3, GLOSSARY).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub name: String,
    pub root_path: String,
    pub port: u16,
    pub ftp_port: Option<u16>,
    pub ftp_username: Option<String>,
    pub ftp_password: Option<String>,
    pub container_id: Option<String>,
    pub owner_id: String,
    pub status: ClusterStatus,
    pub limits: ResourceLimits,
    pub template: String,
    pub message: Option<String>,
}

impl Cluster {
    /// Sanitizes a human name to the `[a-z0-9_]` alphabet used for container
    /// names and FTP sidecar names (spec §4.C).
    pub fn sanitized_name(&self) -> String {
        sanitize_name(&self.name)
    }

    /// Per spec §4.F, the FTP sidecar container name.
    pub fn ftp_container_name(&self) -> String {
        format!("ftp_{}", self.sanitized_name())
    }

    pub fn has_ftp(&self) -> bool {
        self.ftp_port.is_some() && self.ftp_username.is_some() && self.ftp_password.is_some()
    }
}

/// Sanitizes a name to the `[a-z0-9_]` alphabet (spec §4.C).
pub fn sanitize_name(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Health state of a cluster (spec §3). `Unhealthy` is reserved and never
/// constructed in this revision (spec §4.G step 3, §9 Open Question 3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthState {
    Unknown,
    Healthy,
    Unhealthy,
    Failed,
    Recovering,
}

/// 1:1 companion record to a `Cluster` (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub cluster_id: ClusterId,
    pub state: HealthState,
    pub last_check: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_recovery_attempt: Option<DateTime<Utc>>,
    pub recovery_attempts: u32,
    pub total_failures: u64,
    pub total_recoveries: u64,
    pub monitoring_enabled: bool,
    pub max_recovery_attempts: u32,
    pub retry_interval_s: u64,
    pub cooldown_period_s: u64,
    pub last_container_status: Option<String>,
    pub last_sample: Option<HealthMetric>,
    pub error_message: Option<String>,
}

impl HealthStatus {
    pub fn new(cluster_id: ClusterId, max_recovery_attempts: u32, retry_interval_s: u64, cooldown_period_s: u64) -> Self {
        Self {
            cluster_id,
            state: HealthState::Unknown,
            last_check: None,
            last_success: None,
            last_recovery_attempt: None,
            recovery_attempts: 0,
            total_failures: 0,
            total_recoveries: 0,
            monitoring_enabled: true,
            max_recovery_attempts,
            retry_interval_s,
            cooldown_period_s,
            last_container_status: None,
            last_sample: None,
            error_message: None,
        }
    }
}

/// Append-only per-cluster resource sample (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthMetric {
    pub cluster_id: ClusterId,
    pub timestamp: DateTime<Utc>,
    pub cpu_percent_of_limit: f64,
    pub memory_used_mib: f64,
    pub memory_limit_mib: f64,
    pub memory_percent: f64,
    pub disk_used_gib: f64,
    pub disk_limit_gib: f64,
    pub disk_percent: f64,
    pub disk_read_bytes: u64,
    pub disk_write_bytes: u64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
    pub response_time_ms: Option<u64>,
    pub container_restart_count: u32,
    pub container_uptime_seconds: u64,
    pub container_status: String,
    pub container_exit_code: Option<i32>,
}

impl HealthMetric {
    /// A zero-valued sample used when the container is absent/stopped
    /// (spec §4.G step 2).
    pub fn zero(cluster_id: ClusterId, memory_limit_mib: f64) -> Self {
        Self {
            cluster_id,
            timestamp: Utc::now(),
            cpu_percent_of_limit: 0.0,
            memory_used_mib: 0.0,
            memory_limit_mib,
            memory_percent: 0.0,
            disk_used_gib: 0.0,
            disk_limit_gib: 0.0,
            disk_percent: 0.0,
            disk_read_bytes: 0,
            disk_write_bytes: 0,
            network_rx_bytes: 0,
            network_tx_bytes: 0,
            response_time_ms: None,
            container_restart_count: 0,
            container_uptime_seconds: 0,
            container_status: "absent".to_string(),
            container_exit_code: None,
        }
    }
}

/// An observed container status, classified from a driver inspect call
/// (spec §4.G step 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservedContainerState {
    Absent,
    Stopped,
    Running,
}

/// A monotonic wall-clock marker, used by TTL caches and throttles. Not
/// serialized; process-local only.
#[derive(Debug, Clone, Copy)]
pub struct Freshness {
    pub at: Instant,
}

impl Freshness {
    pub fn now() -> Self {
        Self { at: Instant::now() }
    }

    pub fn age(&self) -> std::time::Duration {
        self.at.elapsed()
    }
}
