//! Directory error types.

use locus_wire::WireError;
use std::time::Duration;
use thiserror::Error;

/// Errors returned by directory clients.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// A wire-level failure talking to the registry.
    #[error(transparent)]
    Wire(#[from] WireError),
    /// The registry refused or could not be reached for logon.
    #[error("Logon to directory at {0} rejected")]
    LogonRejected(String),
    /// No logon reply arrived in time.
    #[error("Logon to directory at {directory} timed out after {after:?}")]
    LogonTimeout { directory: String, after: Duration },
    /// The registry answered a resolve with failure.
    #[error("Name not found: {0}")]
    NotFound(String),
    /// The registry refused a lease.
    #[error("Lease refused for {0}")]
    LeaseRefused(String),
    /// A bounded resolve gave up.
    #[error("Resolve of {name} timed out after {after:?}")]
    Timeout { name: String, after: Duration },
    /// The reply endpoint closed before an answer arrived.
    #[error("Reply channel closed")]
    ReplyChannelClosed,
}

/// Alias for directory results.
pub type DirectoryResult<T> = Result<T, DirectoryError>;
