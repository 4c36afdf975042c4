//! Error types for Retrace

use std::io;
use thiserror::Error;

/// Result type for Retrace operations
pub type Result<T> = std::result::Result<T, RetraceError>;

/// Errors that can occur in Retrace
#[derive(Debug, Error)]
pub enum RetraceError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Append to a recordset that was never initialized with `set`
    #[error("Unknown recordset: {0}")]
    UnknownRecordset(String),

    /// Recordset name rejected
    #[error("Invalid recordset name: {0}")]
    InvalidRecordsetName(String),

    /// Failure reported by a matcher implementation
    #[error("Matcher error: {0}")]
    Matcher(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}
