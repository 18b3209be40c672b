// src/core/lifecycle/remediation.rs

//! Maps a classified [`RuntimeError`] to a remediation action (spec §4.E
//! error-classification table) and bounds how many times the lifecycle
//! controller retries a failing operation.

use crate::core::errors::RuntimeError;

/// Caps the number of create/start retries after a remediable failure
/// (spec §4.E: "Remediation is capped at two retries").
pub const MAX_CREATE_RETRIES: u32 = 2;

/// Caps restart-loop remediation to exactly one attempt (spec §4.E
/// "Restart-loop guard").
pub const MAX_RESTART_LOOP_ATTEMPTS: u32 = 1;

/// How many trailing log lines to capture when giving up and surfacing a
/// failure to the operator (spec §4.E, §10.6).
pub const LOG_TAIL_LINES: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemediationAction {
    /// Prune unused networks, then retry the operation.
    PruneAndRetry,
    /// Retry without pruning (the driver may simply need to re-pull).
    RetryOnly,
    /// Stop retrying; surface the error to the operator.
    Fatal,
}

/// Decides the remediation action for a classified error (spec §4.E
/// table). `ResourceError`, `PermissionError`, `ComposeError`,
/// `ExitCodeError`, and `Unknown` are all fatal; only the four categories
/// in [`RuntimeError::is_remediable`] get a retry.
pub fn plan_for(err: &RuntimeError) -> RemediationAction {
    if !err.is_remediable() {
        return RemediationAction::Fatal;
    }
    if err.should_prune_networks() {
        RemediationAction::PruneAndRetry
    } else {
        RemediationAction::RetryOnly
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_conflict_prunes_and_retries() {
        assert_eq!(plan_for(&RuntimeError::PortConflict(String::new())), RemediationAction::PruneAndRetry);
    }

    #[test]
    fn image_error_retries_without_pruning() {
        assert_eq!(plan_for(&RuntimeError::ImageError(String::new())), RemediationAction::RetryOnly);
    }

    #[test]
    fn resource_error_is_fatal() {
        assert_eq!(plan_for(&RuntimeError::ResourceError(String::new())), RemediationAction::Fatal);
    }

    #[test]
    fn exit_code_error_is_fatal() {
        assert_eq!(
            plan_for(&RuntimeError::ExitCodeError { code: 1, raw: String::new() }),
            RemediationAction::Fatal
        );
    }
}
