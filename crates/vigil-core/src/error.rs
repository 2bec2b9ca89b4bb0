//! Error types for the Vigil health core.

use serde::Serialize;
use thiserror::Error;

/// Result type alias for configuration validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors returned by [`CheckConfig::validate`](crate::CheckConfig::validate).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("timeout must be positive")]
    InvalidTimeout,

    #[error("interval must be positive")]
    InvalidInterval,

    #[error("success threshold must be positive")]
    InvalidSuccessThreshold,

    #[error("failure threshold must be positive")]
    InvalidFailureThreshold,
}

/// Why a probe failed.
///
/// The unit variants are sentinels: callers branch on them with `==` or
/// `matches!` instead of inspecting messages. The carrier variants keep the
/// rendered underlying error for diagnostic logging.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ProbeError {
    /// The HTTP response code differed from the expected one.
    #[error("status code mismatch")]
    StatusMismatch,

    /// The gRPC health service reported `NOT_SERVING`.
    #[error("service not serving")]
    NotServing,

    /// The gRPC health service does not know the requested service.
    #[error("service unknown")]
    ServiceUnknown,

    /// The gRPC health service replied with a status outside the protocol.
    #[error("unknown health status")]
    UnknownStatus,

    /// The caller's cancellation token fired.
    #[error("context cancelled")]
    Cancelled,

    /// The effective deadline expired.
    #[error("deadline exceeded")]
    Timeout,

    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("resolve failed: {0}")]
    Resolve(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("rpc failed: {0}")]
    Rpc(String),

    #[error("spawn failed: {0}")]
    Spawn(String),

    /// The command exited unsuccessfully; `None` when killed by a signal.
    #[error("exit status {}", .0.map_or_else(|| "signal".to_string(), |c| c.to_string()))]
    ExitStatus(Option<i32>),

    #[error("icmp error: {0}")]
    Icmp(String),
}

impl ProbeError {
    /// Whether this error came from the caller's cancellation or deadline.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, ProbeError::Cancelled | ProbeError::Timeout)
    }
}
