//! Error types for the communication core.

use thiserror::Error;
use tokio_modbus::ExceptionCode;

/// Result type alias using [`CommError`].
pub type Result<T> = std::result::Result<T, CommError>;

/// Errors surfaced by transports, the connection manager, the poll
/// scheduler and the write path.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CommError {
    /// No response within the configured deadline.
    #[error("Request timed out")]
    Timeout,

    /// Socket or serial-level failure, including malformed responses.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The device answered with a Modbus exception response.
    #[error("Modbus exception: {0:?}")]
    Protocol(ExceptionCode),

    /// The register kind does not support the requested operation.
    #[error("Invalid register kind for this operation: {0}")]
    InvalidKind(String),

    /// The value does not fit the target kind or data type.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// The connection is not usable.
    #[error("Not connected")]
    NotConnected,

    /// No variable with this name is registered.
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),

    /// A variable with this name is already registered.
    #[error("Duplicate variable: {0}")]
    DuplicateVariable(String),

    /// Invalid connection or poll configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The communication worker has shut down.
    #[error("Communication service closed")]
    ServiceClosed,
}

impl CommError {
    /// Create a transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether retrying the same request may succeed without operator action.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CommError::Timeout | CommError::Transport(_))
    }

    /// Whether the error means the link itself is gone.
    pub fn is_link_failure(&self) -> bool {
        matches!(self, CommError::Transport(_))
    }
}

impl From<std::io::Error> for CommError {
    fn from(err: std::io::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<tokio_modbus::Error> for CommError {
    fn from(err: tokio_modbus::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<ExceptionCode> for CommError {
    fn from(code: ExceptionCode) -> Self {
        Self::Protocol(code)
    }
}

impl From<tokio::time::error::Elapsed> for CommError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::Timeout
    }
}
