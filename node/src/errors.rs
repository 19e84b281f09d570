// Ordered imports
use std::fmt::{self, Display};
use std::io;

use super::cache::CacheError;
use super::config::ConfigError;
use super::store::errors::StoreError;
use logger::LoggerError;

/// Enum representing the possible errors that can occur within the `Node`
/// and during query handling.
#[derive(Debug)]
pub enum NodeError {
    /// Error related to configuration loading or validation.
    ConfigError(ConfigError),
    /// Input/output (I/O) error.
    IoError(io::Error),
    /// Error related to lock acquisition.
    LockError,
    /// Error related to the local store.
    StoreError(StoreError),
    /// Error related to the result cache.
    CacheError(CacheError),
    /// Error related to the logger.
    LoggerError(LoggerError),
    /// Error related to the inbound RPC server.
    ServerError(String),
    /// Generic error.
    OtherError,
}

impl Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::ConfigError(e) => write!(f, "Config Error: {}", e),
            NodeError::IoError(e) => write!(f, "I/O Error: {}", e),
            NodeError::LockError => write!(f, "Failed to acquire lock"),
            NodeError::StoreError(e) => write!(f, "Store Error: {}", e),
            NodeError::CacheError(e) => write!(f, "Cache Error: {}", e),
            NodeError::LoggerError(e) => write!(f, "Logger Error: {}", e),
            NodeError::ServerError(msg) => write!(f, "Server Error: {}", msg),
            NodeError::OtherError => write!(f, "Other error"),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<ConfigError> for NodeError {
    /// Conversion from `ConfigError` to `NodeError`.
    fn from(error: ConfigError) -> Self {
        NodeError::ConfigError(error)
    }
}

impl From<io::Error> for NodeError {
    /// Conversion from `io::Error` to `NodeError`.
    fn from(error: io::Error) -> Self {
        NodeError::IoError(error)
    }
}

impl<T> From<std::sync::PoisonError<T>> for NodeError {
    /// Conversion from a lock error (`PoisonError`) to `NodeError`.
    fn from(_: std::sync::PoisonError<T>) -> Self {
        NodeError::LockError
    }
}

impl From<StoreError> for NodeError {
    /// Conversion from `StoreError` to `NodeError`.
    fn from(error: StoreError) -> Self {
        NodeError::StoreError(error)
    }
}

impl From<CacheError> for NodeError {
    /// Conversion from `CacheError` to `NodeError`.
    fn from(error: CacheError) -> Self {
        NodeError::CacheError(error)
    }
}

impl From<LoggerError> for NodeError {
    /// Conversion from `LoggerError` to `NodeError`.
    fn from(error: LoggerError) -> Self {
        NodeError::LoggerError(error)
    }
}
