// src/config.rs

//! Manages server configuration: loading, resolving dynamic values, and
//! validation (spec §6, §10.3).

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use tracing::warn;

/// A raw representation of the config file before validation (spec §10.3:
/// staged `RawConfig` → `Config` resolution, per-field `#[serde(default)]`).
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    ports: PortsConfig,
    #[serde(default)]
    health: HealthConfig,
    #[serde(default)]
    metrics: MetricsConfig,
    #[serde(default)]
    ftp: FtpConfig,
    #[serde(default)]
    backup: BackupConfig,
    #[serde(default)]
    defaults: DefaultsConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_clusters_base_dir")]
    pub clusters_base_dir: String,
    #[serde(default = "default_templates_base_dir")]
    pub templates_base_dir: String,
    #[serde(default = "default_container_binary")]
    pub container_binary: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            clusters_base_dir: default_clusters_base_dir(),
            templates_base_dir: default_templates_base_dir(),
            container_binary: default_container_binary(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_clusters_base_dir() -> String {
    "/srv/clusterforge/clusters".to_string()
}
fn default_templates_base_dir() -> String {
    "/srv/clusterforge/templates".to_string()
}
fn default_container_binary() -> String {
    "docker".to_string()
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct PortsConfig {
    #[serde(default = "default_app_port_start")]
    pub app_port_start: u16,
    #[serde(default = "default_app_port_end")]
    pub app_port_end: u16,
    #[serde(default = "default_ftp_port_start")]
    pub ftp_port_start: u16,
    #[serde(default = "default_ftp_port_end")]
    pub ftp_port_end: u16,
}

impl Default for PortsConfig {
    fn default() -> Self {
        Self {
            app_port_start: default_app_port_start(),
            app_port_end: default_app_port_end(),
            ftp_port_start: default_ftp_port_start(),
            ftp_port_end: default_ftp_port_end(),
        }
    }
}

fn default_app_port_start() -> u16 {
    20000
}
fn default_app_port_end() -> u16 {
    20999
}
fn default_ftp_port_start() -> u16 {
    21000
}
fn default_ftp_port_end() -> u16 {
    21099
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HealthConfig {
    #[serde(default = "default_check_interval_s", with = "humantime_serde::option")]
    pub check_interval_s: Option<std::time::Duration>,
    #[serde(default = "default_max_recovery_attempts")]
    pub max_recovery_attempts: u32,
    #[serde(default = "default_retry_interval_s")]
    pub retry_interval_s: u64,
    #[serde(default = "default_cooldown_period_s")]
    pub cooldown_period_s: u64,
    #[serde(default = "default_max_concurrent_checks")]
    pub max_concurrent_checks: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_interval_s: default_check_interval_s(),
            max_recovery_attempts: default_max_recovery_attempts(),
            retry_interval_s: default_retry_interval_s(),
            cooldown_period_s: default_cooldown_period_s(),
            max_concurrent_checks: default_max_concurrent_checks(),
        }
    }
}

fn default_check_interval_s() -> Option<std::time::Duration> {
    Some(std::time::Duration::from_secs(60))
}
fn default_max_recovery_attempts() -> u32 {
    3
}
fn default_retry_interval_s() -> u64 {
    30
}
fn default_cooldown_period_s() -> u64 {
    300
}
fn default_max_concurrent_checks() -> usize {
    10
}

/// Configuration for the Prometheus metrics exporter (spec §10.5: carried
/// regardless of the REST/auth Non-goal).
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}
fn default_metrics_port() -> u16 {
    9090
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct FtpConfig {
    #[serde(default = "default_ftp_image")]
    pub image: String,
    #[serde(default = "default_ftp_reconcile_interval_s")]
    pub reconcile_interval_s: u64,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            image: default_ftp_image(),
            reconcile_interval_s: default_ftp_reconcile_interval_s(),
        }
    }
}

fn default_ftp_image() -> String {
    "fauria/vsftpd:latest".to_string()
}
fn default_ftp_reconcile_interval_s() -> u64 {
    60
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct BackupConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_concurrent_backups")]
    pub max_concurrent_backups: usize,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_concurrent_backups: default_max_concurrent_backups(),
        }
    }
}

fn default_max_concurrent_backups() -> usize {
    3
}

/// Process-wide resource-limit defaults applied when a create request
/// omits a field (spec §3, §4.E step "Create").
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct DefaultsConfig {
    #[serde(default = "default_cpu_cores")]
    pub cpu_cores: f64,
    #[serde(default = "default_memory_mib")]
    pub memory_mib: u64,
    #[serde(default = "default_disk_gib")]
    pub disk_gib: u64,
    #[serde(default = "default_network_mbps")]
    pub network_mbps: u64,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            cpu_cores: default_cpu_cores(),
            memory_mib: default_memory_mib(),
            disk_gib: default_disk_gib(),
            network_mbps: default_network_mbps(),
        }
    }
}

fn default_cpu_cores() -> f64 {
    1.0
}
fn default_memory_mib() -> u64 {
    512
}
fn default_disk_gib() -> u64 {
    5
}
fn default_network_mbps() -> u64 {
    100
}

/// The final, validated, resolved server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub ports: PortsConfig,
    pub health: HealthConfig,
    pub metrics: MetricsConfig,
    pub ftp: FtpConfig,
    pub backup: BackupConfig,
    pub defaults: DefaultsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            ports: PortsConfig::default(),
            health: HealthConfig::default(),
            metrics: MetricsConfig::default(),
            ftp: FtpConfig::default(),
            backup: BackupConfig::default(),
            defaults: DefaultsConfig::default(),
        }
    }
}

impl Config {
    /// Reads and parses a TOML file into a validated [`Config`].
    pub fn from_file(path: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("Failed to read config file at '{path}'"))?;
        let raw: RawConfig =
            toml::from_str(&contents).with_context(|| format!("Failed to parse TOML from '{path}'"))?;

        let config = Config {
            server: raw.server,
            ports: raw.ports,
            health: raw.health,
            metrics: raw.metrics,
            ftp: raw.ftp,
            backup: raw.backup,
            defaults: raw.defaults,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow!("server.port cannot be 0"));
        }
        if self.server.host.trim().is_empty() {
            return Err(anyhow!("server.host cannot be empty"));
        }
        if self.ports.app_port_start >= self.ports.app_port_end {
            return Err(anyhow!("ports.app_port_start must be less than ports.app_port_end"));
        }
        if self.ports.ftp_port_start >= self.ports.ftp_port_end {
            return Err(anyhow!("ports.ftp_port_start must be less than ports.ftp_port_end"));
        }
        if self.health.max_recovery_attempts == 0 {
            warn!("health.max_recovery_attempts is 0; no cluster will ever auto-recover");
        }
        if self.health.max_concurrent_checks == 0 {
            return Err(anyhow!("health.max_concurrent_checks cannot be 0"));
        }
        if self.metrics.enabled && self.metrics.port == self.server.port {
            return Err(anyhow!("metrics.port cannot be the same as server.port"));
        }
        if self.defaults.cpu_cores <= 0.0 {
            return Err(anyhow!("defaults.cpu_cores must be positive"));
        }
        if self.defaults.memory_mib == 0 {
            return Err(anyhow!("defaults.memory_mib cannot be 0"));
        }
        if self.backup.enabled && self.backup.max_concurrent_backups == 0 {
            return Err(anyhow!("backup.max_concurrent_backups cannot be 0 when backup is enabled"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate_cleanly() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn rejects_inverted_app_port_range() {
        let mut cfg = Config::default();
        cfg.ports.app_port_start = 20999;
        cfg.ports.app_port_end = 20000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_metrics_port_collision() {
        let mut cfg = Config::default();
        cfg.metrics.port = cfg.server.port;
        assert!(cfg.validate().is_err());
    }
}
