//! Errors from the wire layer.

use locus_types::{ChannelLocation, NodeId};
use thiserror::Error;

/// Errors from encoding, decoding and delivering frames.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Frame truncated: {needed} more bytes expected")]
    Truncated { needed: usize },
    #[error("Unknown message type: {0}")]
    UnknownMessageType(u8),
    #[error("String too long for frame: {len} bytes (max {max})")]
    StringTooLong { len: usize, max: usize },
    #[error("Invalid UTF-8 in frame")]
    InvalidUtf8,
    #[error("Invalid channel location in frame: {0}")]
    InvalidLocation(String),
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: u32, max: u32 },
    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Node unreachable: {0}")]
    NodeUnreachable(String),
    #[error("Link to {0} lost")]
    LinkLost(NodeId),
    #[error("No endpoint at {0}")]
    EndpointNotFound(ChannelLocation),
    #[error("Endpoint index {0} already in use")]
    EndpointInUse(u64),
}

impl WireError {
    /// Whether the failure means the destination moved or went away, as
    /// opposed to a malformed frame or local fault. Routing failures are the
    /// ones a writer may recover from by re-resolving its destination.
    pub fn is_routing_failure(&self) -> bool {
        matches!(
            self,
            Self::NodeUnreachable(_)
                | Self::LinkLost(_)
                | Self::EndpointNotFound(_)
                | Self::ConnectionClosed
        )
    }
}

/// Alias for wire results.
pub type WireResult<T> = Result<T, WireError>;
