//! Shared error types for Locus.

use thiserror::Error;

/// Top-level error type for values parsed or loaded by Locus.
#[derive(Error, Debug)]
pub enum LocusError {
    /// A node identity string could not be parsed.
    #[error("Invalid node identity: {0}")]
    InvalidNodeId(String),

    /// A channel location string could not be parsed.
    #[error("Invalid channel location: {0}")]
    InvalidLocation(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Alias for Result with LocusError.
pub type LocusResult<T> = Result<T, LocusError>;
