// src/core/errors.rs

//! Defines the primary error type for the entire application.

use thiserror::Error;

/// The main error enum, representing all possible failures within the control plane.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ControlPlaneError {
    #[error("cluster not found: {0}")]
    ClusterNotFound(String),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("backup not found: {0}")]
    BackupNotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("not authorized: {0}")]
    Authorization(String),

    #[error("runtime error: {0}")]
    RuntimeExternal(#[from] RuntimeError),

    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("operation interrupted")]
    Interrupted,

    #[error("compose spec error: {0}")]
    ComposeSpec(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<std::io::Error> for ControlPlaneError {
    fn from(e: std::io::Error) -> Self {
        ControlPlaneError::Io(e.to_string())
    }
}

impl From<toml::de::Error> for ControlPlaneError {
    fn from(e: toml::de::Error) -> Self {
        ControlPlaneError::Internal(format!("config parse error: {e}"))
    }
}

/// The maximum length, in bytes, an error message may occupy once persisted
/// to the store (spec §3, §7: "bounded to 500 bytes").
pub const MAX_PERSISTED_ERROR_BYTES: usize = 500;

/// Truncates a message to [`MAX_PERSISTED_ERROR_BYTES`] on a UTF-8 boundary.
pub fn truncate_for_storage(message: &str) -> String {
    if message.len() <= MAX_PERSISTED_ERROR_BYTES {
        return message.to_string();
    }
    let mut end = MAX_PERSISTED_ERROR_BYTES;
    while end > 0 && !message.is_char_boundary(end) {
        end -= 1;
    }
    message[..end].to_string()
}

/// A classified failure from the container driver boundary (spec §4.E, §9).
///
/// All driver call sites see only this typed sum; no other layer inspects
/// the driver's raw stdout/stderr text after classification occurs once here.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RuntimeError {
    #[error("port conflict: {0}")]
    PortConflict(String),
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("image error: {0}")]
    ImageError(String),
    #[error("volume error: {0}")]
    VolumeError(String),
    #[error("resource error: {0}")]
    ResourceError(String),
    #[error("permission error: {0}")]
    PermissionError(String),
    #[error("compose error: {0}")]
    ComposeError(String),
    #[error("process exited with code {code}: {raw}")]
    ExitCodeError { code: i32, raw: String },
    #[error("unknown driver failure: {0}")]
    Unknown(String),
}

impl RuntimeError {
    /// The category name, used for logging and metrics labels.
    pub fn category(&self) -> &'static str {
        match self {
            RuntimeError::PortConflict(_) => "PortConflict",
            RuntimeError::NetworkError(_) => "NetworkError",
            RuntimeError::ImageError(_) => "ImageError",
            RuntimeError::VolumeError(_) => "VolumeError",
            RuntimeError::ResourceError(_) => "ResourceError",
            RuntimeError::PermissionError(_) => "PermissionError",
            RuntimeError::ComposeError(_) => "ComposeError",
            RuntimeError::ExitCodeError { .. } => "ExitCodeError",
            RuntimeError::Unknown(_) => "Unknown",
        }
    }

    /// Whether this category is locally remediable (retried) rather than fatal
    /// and immediately reported (spec §4.E table).
    pub fn is_remediable(&self) -> bool {
        matches!(
            self,
            RuntimeError::PortConflict(_)
                | RuntimeError::NetworkError(_)
                | RuntimeError::ImageError(_)
                | RuntimeError::VolumeError(_)
        )
    }

    /// Whether `prune_unused_networks` should run before the retry.
    pub fn should_prune_networks(&self) -> bool {
        matches!(
            self,
            RuntimeError::PortConflict(_) | RuntimeError::NetworkError(_) | RuntimeError::VolumeError(_)
        )
    }
}
