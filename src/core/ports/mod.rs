// src/core/ports/mod.rs

//! Allocates application and FTP ports, and computes the passive-mode port
//! window each FTP sidecar advertises (spec §4.B, §6).

use crate::core::errors::ControlPlaneError;
use crate::core::store::Store;
use dashmap::DashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;

const APP_PORT_START: u16 = 20000;
const APP_PORT_END: u16 = 20999;
const FTP_PORT_START: u16 = 21000;
const FTP_PORT_END: u16 = 21099;
const PASV_WINDOW_SIZE: u16 = 10;
const PASV_BASE: u16 = 21100;
const PASV_CEILING: u16 = 22000;

/// Tracks ports this process has handed out, so concurrent allocations
/// within the same process never race each other; the OS-level `is_free`
/// probe still guards against external ports already in use (spec §4.B).
pub struct PortAllocator {
    reserved: DashSet<u16>,
    /// The cluster store, consulted so a port still recorded on a (e.g.
    /// stopped) cluster row is never handed out even if the OS reports it
    /// bindable (spec §4.B: "not recorded in the cluster store").
    store: Option<Arc<dyn Store>>,
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl PortAllocator {
    pub fn new() -> Self {
        Self {
            reserved: DashSet::new(),
            store: None,
        }
    }

    pub fn with_store(store: Arc<dyn Store>) -> Self {
        Self {
            reserved: DashSet::new(),
            store: Some(store),
        }
    }

    /// Probes whether `port` is currently bindable on all interfaces.
    pub async fn is_free(&self, port: u16) -> bool {
        if self.reserved.contains(&port) {
            return false;
        }
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        TcpListener::bind(addr).await.is_ok()
    }

    /// `is_free` plus a check that no persisted cluster row already claims
    /// `port` as its application or FTP port (spec §4.B).
    async fn is_free_considering_store(&self, port: u16) -> bool {
        if !self.is_free(port).await {
            return false;
        }
        if let Some(store) = &self.store {
            match store.list_clusters().await {
                Ok(clusters) => {
                    return !clusters
                        .iter()
                        .any(|c| c.port == port || c.ftp_port == Some(port));
                }
                Err(_) => return false,
            }
        }
        true
    }

    async fn next_free_in_range(&self, start: u16, end: u16) -> Result<u16, ControlPlaneError> {
        for port in start..=end {
            if self.is_free_considering_store(port).await {
                self.reserved.insert(port);
                return Ok(port);
            }
        }
        Err(ControlPlaneError::Validation(format!(
            "no free port available in range {start}-{end}"
        )))
    }

    /// Allocates the next free application port in `20000-20999`.
    pub async fn next_application_port(&self) -> Result<u16, ControlPlaneError> {
        self.next_free_in_range(APP_PORT_START, APP_PORT_END).await
    }

    /// Allocates the next free FTP control port in `21000-21099`.
    pub async fn next_ftp_port(&self) -> Result<u16, ControlPlaneError> {
        self.next_free_in_range(FTP_PORT_START, FTP_PORT_END).await
    }

    /// Releases a port this process reserved, e.g. after a failed create
    /// (spec §4.E rollback).
    pub fn release(&self, port: u16) {
        self.reserved.remove(&port);
    }

    /// Computes the 10-port passive-mode window for a given FTP control
    /// port, wrapping back below 22000 (spec §6):
    /// `21100 + 10 * (ftp_port - 21000)`, modulo the span so the window
    /// never exceeds the 22000 ceiling.
    pub fn pasv_window_for(&self, ftp_port: u16) -> (u16, u16) {
        let offset = ftp_port.saturating_sub(FTP_PORT_START);
        let span = PASV_CEILING - PASV_BASE;
        let start = PASV_BASE + (offset * PASV_WINDOW_SIZE) % span;
        let end = start + PASV_WINDOW_SIZE - 1;
        (start, end)
    }

    /// Polls the passive-mode window for `ftp_port` until every port in it
    /// is free or `max_wait` elapses (spec §10.6: first-class operation
    /// used before recreating an FTP sidecar whose old process may still
    /// hold its passive ports during teardown).
    pub async fn wait_for_pasv_window_free(&self, ftp_port: u16, max_wait: std::time::Duration) -> bool {
        let (start, end) = self.pasv_window_for(ftp_port);
        let deadline = tokio::time::Instant::now() + max_wait;
        loop {
            let mut all_free = true;
            for port in start..=end {
                if !self.is_free(port).await {
                    all_free = false;
                    break;
                }
            }
            if all_free {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pasv_window_matches_formula() {
        let alloc = PortAllocator::new();
        assert_eq!(alloc.pasv_window_for(21000), (21100, 21109));
        assert_eq!(alloc.pasv_window_for(21001), (21110, 21119));
    }

    #[test]
    fn pasv_window_wraps_below_ceiling() {
        let alloc = PortAllocator::new();
        let (start, end) = alloc.pasv_window_for(21099);
        assert!(end < PASV_CEILING, "window end {end} must stay below {PASV_CEILING}");
        assert!(start >= PASV_BASE);
    }

    #[tokio::test]
    async fn allocates_distinct_application_ports() {
        let alloc = PortAllocator::new();
        let a = alloc.next_application_port().await.unwrap();
        let b = alloc.next_application_port().await.unwrap();
        assert_ne!(a, b);
        assert!((APP_PORT_START..=APP_PORT_END).contains(&a));
    }

    #[tokio::test]
    async fn release_allows_reallocation() {
        let alloc = PortAllocator::new();
        let a = alloc.next_application_port().await.unwrap();
        alloc.release(a);
        assert!(alloc.is_free(a).await);
    }
}
