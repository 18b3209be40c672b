// src/core/driver/mod.rs

//! The Container Driver: a thin async wrapper over an external container
//! runtime CLI (spec §4.A). Every other subsystem reaches the runtime only
//! through [`ContainerDriver`]; no other module shells out directly.

pub mod classify;

use crate::core::errors::RuntimeError;
use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::OnceCell;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

const CALL_TIMEOUT: Duration = Duration::from_secs(30);
const LOGS_TIMEOUT: Duration = Duration::from_secs(10);

/// Observed lifecycle status of a container, as reported by `inspect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InspectState {
    Running,
    Stopped,
    Absent,
}

/// Parsed `stats` sample for a single container (spec §4.A, feeds §4.H).
#[derive(Debug, Clone, Default)]
pub struct ContainerStats {
    pub cpu_percent_raw: f64,
    pub mem_used_bytes: u64,
    pub mem_limit_bytes: u64,
    pub net_rx_bytes: u64,
    pub net_tx_bytes: u64,
    pub block_read_bytes: u64,
    pub block_write_bytes: u64,
}

/// Result of inspecting a container: its state, restart count, uptime, and
/// exit code (when stopped).
#[derive(Debug, Clone)]
pub struct InspectResult {
    pub state: InspectState,
    pub restart_count: u32,
    pub uptime_seconds: u64,
    pub exit_code: Option<i32>,
    /// The raw single-line status text (e.g. `running`, `restarting`,
    /// `exited`, `absent`), mirrored onto `HealthMetric.container_status`
    /// for display (spec §3).
    pub status_text: String,
}

/// The async boundary between the control plane and the host container
/// runtime (spec §4.A). Implementations shell out to a CLI; callers never
/// see raw process output, only [`RuntimeError`] once classified.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    async fn run(&self, compose_path: &str) -> Result<(), RuntimeError>;
    async fn start(&self, name: &str) -> Result<(), RuntimeError>;
    async fn stop(&self, name: &str) -> Result<(), RuntimeError>;
    async fn remove(&self, name: &str) -> Result<(), RuntimeError>;
    async fn inspect(&self, name: &str) -> Result<InspectResult, RuntimeError>;
    async fn stats(&self, name: &str) -> Result<ContainerStats, RuntimeError>;
    async fn resolve_id(&self, name: &str) -> Result<Option<String>, RuntimeError>;
    async fn prune_unused_networks(&self) -> Result<(), RuntimeError>;
    async fn logs(&self, name: &str, tail_lines: usize) -> Result<String, RuntimeError>;

    /// Invalidates any cached name→id mapping for `name`, e.g. after
    /// `remove` or a driver-external recreate (spec §4.A).
    fn invalidate_cache(&self, name: &str);
}

/// Shells out to `docker compose` / `docker`, auto-detecting whether `sudo`
/// is required once per process (spec §10.6).
pub struct CliContainerDriver {
    binary: String,
    compose_subcommand: Vec<String>,
    id_cache: DashMap<String, String>,
    sudo_needed: OnceCell<bool>,
}

impl CliContainerDriver {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            compose_subcommand: vec!["compose".to_string()],
            id_cache: DashMap::new(),
            sudo_needed: OnceCell::new(),
        }
    }

    /// Probes once whether the container runtime requires `sudo` to reach
    /// the daemon socket, caching the result for the process lifetime
    /// (spec §10.6): a plain `ps` call either succeeds or is rejected for
    /// permission reasons, and the answer cannot change mid-process.
    async fn needs_sudo(&self) -> bool {
        if let Some(v) = self.sudo_needed.get() {
            return *v;
        }
        let probe = Command::new(&self.binary).arg("ps").output().await;
        let needs = match probe {
            Ok(out) => {
                let combined = format!(
                    "{}{}",
                    String::from_utf8_lossy(&out.stdout),
                    String::from_utf8_lossy(&out.stderr)
                );
                !out.status.success() && combined.to_lowercase().contains("permission denied")
            }
            Err(_) => false,
        };
        let _ = self.sudo_needed.set(needs);
        debug!(needs_sudo = needs, "container runtime sudo probe complete");
        needs
    }

    async fn command(&self, args: &[&str]) -> Command {
        if self.needs_sudo().await {
            let mut cmd = Command::new("sudo");
            cmd.arg(&self.binary).args(args);
            cmd
        } else {
            let mut cmd = Command::new(&self.binary);
            cmd.args(args);
            cmd
        }
    }

    async fn run_captured(&self, args: &[&str]) -> Result<(String, bool), RuntimeError> {
        let mut cmd = self.command(args).await;
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        let output = match timeout(CALL_TIMEOUT, cmd.output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return Err(RuntimeError::Unknown(e.to_string())),
            Err(_) => return Err(RuntimeError::Unknown("driver call timed out".to_string())),
        };
        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
        if !output.status.success() {
            let err = classify::classify(&combined);
            warn!(category = err.category(), "driver call failed");
            return Err(err);
        }
        Ok((combined, output.status.success()))
    }
}

#[async_trait]
impl ContainerDriver for CliContainerDriver {
    async fn run(&self, compose_path: &str) -> Result<(), RuntimeError> {
        let mut args = self.compose_subcommand.iter().map(String::as_str).collect::<Vec<_>>();
        args.extend(["-f", compose_path, "up", "-d"]);
        self.run_captured(&args).await?;
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), RuntimeError> {
        self.run_captured(&["start", name]).await?;
        Ok(())
    }

    async fn stop(&self, name: &str) -> Result<(), RuntimeError> {
        self.run_captured(&["stop", name]).await?;
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<(), RuntimeError> {
        self.run_captured(&["rm", "-f", name]).await?;
        self.invalidate_cache(name);
        Ok(())
    }

    async fn inspect(&self, name: &str) -> Result<InspectResult, RuntimeError> {
        let fmt = "{{.State.Status}}|{{.RestartCount}}|{{.State.StartedAt}}|{{.State.ExitCode}}";
        match self.run_captured(&["inspect", "--format", fmt, name]).await {
            Ok((out, _)) => parse_inspect(&out),
            Err(RuntimeError::Unknown(ref msg)) if msg.to_lowercase().contains("no such") => {
                Ok(InspectResult {
                    state: InspectState::Absent,
                    restart_count: 0,
                    uptime_seconds: 0,
                    exit_code: None,
                    status_text: "absent".to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn stats(&self, name: &str) -> Result<ContainerStats, RuntimeError> {
        let fmt = "{{.CPUPerc}}|{{.MemUsage}}|{{.NetIO}}|{{.BlockIO}}";
        let (out, _) = self.run_captured(&["stats", "--no-stream", "--format", fmt, name]).await?;
        crate::core::metrics_pipeline::parse::parse_stats_line(&out)
            .ok_or_else(|| RuntimeError::Unknown(format!("unparseable stats line: {out}")))
    }

    async fn resolve_id(&self, name: &str) -> Result<Option<String>, RuntimeError> {
        if let Some(id) = self.id_cache.get(name) {
            return Ok(Some(id.clone()));
        }
        let (out, _) = match self.run_captured(&["ps", "-aq", "--filter", &name_filter_arg(name)]).await {
            Ok(v) => v,
            Err(e) => return Err(e),
        };
        let id = out.trim();
        if id.is_empty() {
            return Ok(None);
        }
        self.id_cache.insert(name.to_string(), id.to_string());
        Ok(Some(id.to_string()))
    }

    async fn prune_unused_networks(&self) -> Result<(), RuntimeError> {
        self.run_captured(&["network", "prune", "-f"]).await?;
        Ok(())
    }

    async fn logs(&self, name: &str, tail_lines: usize) -> Result<String, RuntimeError> {
        let tail = tail_lines.to_string();
        let mut cmd = self.command(&["logs", "--tail", &tail, name]).await;
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        let output = match timeout(LOGS_TIMEOUT, cmd.output()).await {
            Ok(Ok(out)) => out,
            Ok(Err(e)) => return Err(RuntimeError::Unknown(e.to_string())),
            Err(_) => return Err(RuntimeError::Unknown("logs call timed out".to_string())),
        };
        Ok(format!(
            "{}{}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ))
    }

    fn invalidate_cache(&self, name: &str) {
        self.id_cache.remove(name);
    }
}

/// Builds the `docker ps --filter` value for `resolve_id`. Docker's `name`
/// filter is a substring match, not an exact one, so a cluster name is
/// found even when a template's `container_name:` anchor prefixes it (e.g.
/// `php_web_alice` for cluster `alice`).
fn name_filter_arg(name: &str) -> String {
    format!("name={name}")
}

fn parse_inspect(raw: &str) -> Result<InspectResult, RuntimeError> {
    let parts: Vec<&str> = raw.trim().split('|').collect();
    if parts.len() != 4 {
        return Err(RuntimeError::Unknown(format!("unparseable inspect output: {raw}")));
    }
    let state = match parts[0] {
        "running" => InspectState::Running,
        _ => InspectState::Stopped,
    };
    let restart_count = parts[1].parse().unwrap_or(0);
    let uptime_seconds = chrono::DateTime::parse_from_rfc3339(parts[2])
        .map(|started| (chrono::Utc::now() - started.with_timezone(&chrono::Utc)).num_seconds().max(0) as u64)
        .unwrap_or(0);
    let exit_code = parts[3].parse::<i32>().ok().filter(|_| state == InspectState::Stopped);
    Ok(InspectResult {
        state,
        restart_count,
        uptime_seconds,
        exit_code,
        status_text: parts[0].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_running_inspect_line() {
        let raw = "running|0|2026-07-28T10:00:00Z|0";
        let r = parse_inspect(raw).unwrap();
        assert_eq!(r.state, InspectState::Running);
        assert_eq!(r.restart_count, 0);
    }

    #[test]
    fn parses_stopped_inspect_line_with_exit_code() {
        let raw = "exited|3|2026-07-28T10:00:00Z|137";
        let r = parse_inspect(raw).unwrap();
        assert_eq!(r.state, InspectState::Stopped);
        assert_eq!(r.restart_count, 3);
        assert_eq!(r.exit_code, Some(137));
    }

    #[test]
    fn rejects_malformed_inspect_line() {
        assert!(parse_inspect("garbage").is_err());
    }

    #[test]
    fn name_filter_tolerates_prefixed_container_names() {
        let filter = name_filter_arg("alice");
        assert_eq!(filter, "name=alice");
        assert!(!filter.contains('^'), "filter must not anchor to an exact match");
    }
}
