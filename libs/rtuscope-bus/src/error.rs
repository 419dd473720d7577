//! Bus engine error types

use thiserror::Error;

/// Result type for rtuscope-bus operations
pub type Result<T> = std::result::Result<T, BusError>;

/// Bus engine errors
#[derive(Debug, Error, Clone)]
pub enum BusError {
    /// Serial link failures
    #[error("Link error: {0}")]
    Link(String),

    /// Malformed or implausible wire data
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Request rejected: queue full or memory low
    #[error("Overload: {0}")]
    Overload(String),

    /// Unrecoverable internal inconsistency; abort init
    #[error("Fatal: {0}")]
    Fatal(String),

    /// IO errors from the transport backend
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for BusError {
    fn from(err: std::io::Error) -> Self {
        BusError::Io(err.to_string())
    }
}

impl BusError {
    pub fn link(msg: impl Into<String>) -> Self {
        BusError::Link(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        BusError::Protocol(msg.into())
    }

    pub fn overload(msg: impl Into<String>) -> Self {
        BusError::Overload(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        BusError::Fatal(msg.into())
    }
}
