//! Error types shared across the crate.

use thiserror::Error;

/// Result alias used by every fallible operation in vmhost.
pub type VmhostResult<T> = Result<T, VmhostError>;

/// Domain error taxonomy.
///
/// Variants are grouped by the layer that raises them. Provisioning errors
/// are recorded on the owning Task and then returned unchanged, so the
/// `Display` text a caller sees is the same text the Task carries.
#[derive(Debug, Error)]
pub enum VmhostError {
    /// A referenced entity (instance, task, network, image, ...) is absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// The target path or name already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// CIDR is malformed or too small to hold a DHCP range.
    #[error("invalid network: {0}")]
    InvalidNetwork(String),

    /// Bootstrap template failed to parse or to substitute.
    #[error("template error: {0}")]
    Template(String),

    /// External bootstrap converter could not run or exited non-zero.
    #[error("render failure: {0}")]
    RenderFailure(String),

    /// Unknown or intentionally unimplemented kind combination.
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// A subprocess could not be spawned.
    #[error("process launch failure: {0}")]
    ProcessLaunch(String),

    /// Operation not permitted in the current state (terminal Task, ...).
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The disk-image tool exited non-zero.
    #[error("disk operation failed: {0}")]
    Disk(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
