// src/core/driver/classify.rs

//! Classifies a container driver's combined stdout/stderr into a
//! [`RuntimeError`], once, at the driver boundary (spec §4.E, §9).
//!
//! No other layer in the control plane inspects raw driver output strings;
//! everything downstream matches on the resulting enum.

use crate::core::errors::RuntimeError;
use regex::Regex;

/// Classifies raw combined stdout/stderr text from a driver invocation.
pub fn classify(raw: &str) -> RuntimeError {
    let lower = raw.to_lowercase();

    if lower.contains("address already in use") || lower.contains("port is already allocated") {
        return RuntimeError::PortConflict(raw.to_string());
    }

    if contains_network_error(&lower) {
        return RuntimeError::NetworkError(raw.to_string());
    }

    if contains_any(&lower, &["image ", "pull "]) && contains_any(&lower, &["not found", "pull "])
    {
        return RuntimeError::ImageError(raw.to_string());
    }

    if contains_any(&lower, &["volume ", "mount "]) {
        return RuntimeError::VolumeError(raw.to_string());
    }

    if contains_any(&lower, &["memory", "cpu", "resource"]) {
        return RuntimeError::ResourceError(raw.to_string());
    }

    if contains_any(&lower, &["permission denied", "access denied"]) {
        return RuntimeError::PermissionError(raw.to_string());
    }

    if contains_any(&lower, &["compose", "yaml", "invalid"]) {
        return RuntimeError::ComposeError(raw.to_string());
    }

    if let Some(code) = exit_code_of(raw) {
        if code != 0 {
            return RuntimeError::ExitCodeError {
                code,
                raw: raw.to_string(),
            };
        }
    }

    RuntimeError::Unknown(raw.to_string())
}

fn contains_network_error(lower: &str) -> bool {
    (lower.contains("network") && (lower.contains("not found") || lower.contains("already exists")))
        || lower.contains("all predefined address pools have been fully subnetted")
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Extracts the integer exit code from a line of the shape
/// `Process exited with code: N`.
fn exit_code_of(raw: &str) -> Option<i32> {
    let re = Regex::new(r"(?i)process exited with code:?\s*(-?\d+)").ok()?;
    let caps = re.captures(raw)?;
    caps.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_conflict() {
        let raw = "Bind for 0.0.0.0:9001 failed: port is already allocated";
        assert_eq!(classify(raw).category(), "PortConflict");
    }

    #[test]
    fn network_not_found() {
        let raw = "Error response from daemon: network foo not found";
        assert_eq!(classify(raw).category(), "NetworkError");
    }

    #[test]
    fn address_pool_exhausted() {
        let raw = "all predefined address pools have been fully subnetted";
        assert_eq!(classify(raw).category(), "NetworkError");
    }

    #[test]
    fn image_not_found() {
        let raw = "Error: image library/php_web:latest not found";
        assert_eq!(classify(raw).category(), "ImageError");
    }

    #[test]
    fn permission_denied() {
        let raw = "mkdir: permission denied";
        assert_eq!(classify(raw).category(), "PermissionError");
    }

    #[test]
    fn exit_code_nonzero() {
        let raw = "Process exited with code: 137";
        let err = classify(raw);
        assert_eq!(err.category(), "ExitCodeError");
        assert!(matches!(err, RuntimeError::ExitCodeError { code: 137, .. }));
    }

    #[test]
    fn unknown_fallback() {
        let raw = "something entirely unrecognized happened";
        assert_eq!(classify(raw).category(), "Unknown");
    }

    #[test]
    fn remediable_categories_are_capped() {
        assert!(RuntimeError::PortConflict(String::new()).is_remediable());
        assert!(RuntimeError::NetworkError(String::new()).is_remediable());
        assert!(!RuntimeError::ResourceError(String::new()).is_remediable());
        assert!(!RuntimeError::PermissionError(String::new()).is_remediable());
    }
}
