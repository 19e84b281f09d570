use std::fmt::{self, Display};
use std::io;

/// Errors produced by the local row store.
#[derive(Debug)]
pub enum StoreError {
    /// Input/output error while reading a dataset file.
    IoError(io::Error),
    /// The CSV reader rejected the file or a row.
    CsvError(String),
    /// Error related to lock acquisition.
    LockError,
}

impl Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::IoError(e) => write!(f, "I/O Error: {}", e),
            StoreError::CsvError(msg) => write!(f, "CSV Error: {}", msg),
            StoreError::LockError => write!(f, "Failed to acquire store lock"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<io::Error> for StoreError {
    /// Conversion from `io::Error` to `StoreError`.
    fn from(error: io::Error) -> Self {
        StoreError::IoError(error)
    }
}

impl From<csv::Error> for StoreError {
    /// Conversion from `csv::Error` to `StoreError`.
    fn from(error: csv::Error) -> Self {
        StoreError::CsvError(error.to_string())
    }
}
