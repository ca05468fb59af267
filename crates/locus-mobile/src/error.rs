//! Errors from migratable channel ends.

use locus_directory::DirectoryError;
use locus_wire::WireError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MobilityError {
    /// The local endpoint could not be built or published.
    #[error("Channel construction failed: {0}")]
    Construction(String),
    /// Serialization was attempted before a successful `prepare_to_move`.
    #[error("Channel end not prepared to move")]
    NotPrepared,
    /// Every write attempt failed to reach the destination.
    #[error("Write failed after {attempts} attempts: {source}")]
    Write {
        attempts: u32,
        #[source]
        source: WireError,
    },
    #[error(transparent)]
    Wire(#[from] WireError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
    #[error("Payload encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
    /// The endpoint stopped receiving.
    #[error("Channel closed")]
    Closed,
}

pub type MobilityResult<T> = Result<T, MobilityError>;
