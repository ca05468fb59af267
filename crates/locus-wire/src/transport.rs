//! The transport seam between channels and the network.

use crate::endpoint::Endpoint;
use crate::error::WireResult;
use async_trait::async_trait;
use bytes::Bytes;
use locus_types::{ChannelLocation, NodeId};
use tokio::sync::broadcast;

/// Capacity of each node-lost broadcast channel.
pub const NODE_LOST_CAPACITY: usize = 256;

/// Carries payloads to channel locations and reports nodes that vanish.
///
/// `send` resolves once the payload has been queued at the destination
/// endpoint, or fails with a routing error if the destination node or
/// endpoint is gone.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Identity of this node.
    fn local_node(&self) -> &NodeId;

    /// Open a receiving endpoint at a fresh index.
    fn open_endpoint(&self) -> Endpoint;

    /// Open a receiving endpoint at a well-known index.
    fn open_numbered_endpoint(&self, index: u64) -> WireResult<Endpoint>;

    /// Deliver `payload` to the endpoint at `to`.
    async fn send(&self, to: &ChannelLocation, payload: Bytes) -> WireResult<()>;

    /// Subscribe to notifications of nodes this node can no longer reach.
    fn subscribe_node_lost(&self) -> broadcast::Receiver<NodeId>;
}
