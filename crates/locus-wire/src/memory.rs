//! In-process transport.
//!
//! A [`MemoryNetwork`] hosts any number of nodes in one process. Each call
//! to [`MemoryNetwork::join`] adds a node; [`MemoryNetwork::disconnect`]
//! removes one and tells every node, including the removed one, that the
//! link between them is gone.

use crate::endpoint::{Endpoint, EndpointTable};
use crate::error::{WireError, WireResult};
use crate::transport::{Transport, NODE_LOST_CAPACITY};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use locus_types::{ChannelLocation, NodeId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

struct NodeSlot {
    table: Arc<EndpointTable>,
    lost_tx: broadcast::Sender<NodeId>,
}

struct NetworkInner {
    nodes: DashMap<String, Arc<NodeSlot>>,
    next_address: AtomicU64,
}

/// A set of nodes connected in-process.
#[derive(Clone)]
pub struct MemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(NetworkInner {
                nodes: DashMap::new(),
                next_address: AtomicU64::new(1),
            }),
        }
    }

    /// Add a node to the network.
    pub fn join(&self) -> Arc<MemoryTransport> {
        let n = self.inner.next_address.fetch_add(1, Ordering::Relaxed);
        let node = NodeId::new(format!("mem-{n}"));
        let (lost_tx, _) = broadcast::channel(NODE_LOST_CAPACITY);
        let slot = Arc::new(NodeSlot {
            table: EndpointTable::new(node.clone()),
            lost_tx,
        });
        self.inner
            .nodes
            .insert(node.address().to_string(), Arc::clone(&slot));
        debug!(node = %node, "Node joined memory network");
        Arc::new(MemoryTransport {
            node,
            slot,
            network: self.clone(),
        })
    }

    /// Cut `node` off from the network. Returns false if it was not present.
    pub fn disconnect(&self, node: &NodeId) -> bool {
        let Some((_, gone)) = self
            .inner
            .nodes
            .remove_if(node.address(), |_, slot| slot.table.node() == node)
        else {
            return false;
        };
        info!(node = %node, "Node disconnected from memory network");
        for entry in self.inner.nodes.iter() {
            let _ = entry.value().lost_tx.send(node.clone());
            let _ = gone.lost_tx.send(entry.value().table.node().clone());
        }
        true
    }

    pub fn contains(&self, node: &NodeId) -> bool {
        self.inner
            .nodes
            .get(node.address())
            .is_some_and(|slot| slot.table.node() == node)
    }

    pub fn len(&self) -> usize {
        self.inner.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.nodes.is_empty()
    }
}

impl Default for MemoryNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// One node's view of a [`MemoryNetwork`].
pub struct MemoryTransport {
    node: NodeId,
    slot: Arc<NodeSlot>,
    network: MemoryNetwork,
}

impl MemoryTransport {
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_node(&self) -> &NodeId {
        &self.node
    }

    fn open_endpoint(&self) -> Endpoint {
        self.slot.table.open()
    }

    fn open_numbered_endpoint(&self, index: u64) -> WireResult<Endpoint> {
        self.slot.table.open_numbered(index)
    }

    async fn send(&self, to: &ChannelLocation, payload: Bytes) -> WireResult<()> {
        if !self.network.contains(&self.node) {
            return Err(WireError::LinkLost(to.node().clone()));
        }
        let target = self
            .network
            .inner
            .nodes
            .get(to.node().address())
            .map(|slot| Arc::clone(slot.value()))
            .ok_or_else(|| WireError::NodeUnreachable(to.node().address().to_string()))?;
        if target.table.node() != to.node() {
            return Err(WireError::LinkLost(to.node().clone()));
        }
        target.table.deliver(to.index(), payload)
    }

    fn subscribe_node_lost(&self) -> broadcast::Receiver<NodeId> {
        self.slot.lost_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_between_nodes() {
        let net = MemoryNetwork::new();
        let a = net.join();
        let b = net.join();
        let mut ep = b.open_endpoint();
        a.send(ep.location(), Bytes::from_static(b"ping"))
            .await
            .unwrap();
        assert_eq!(ep.recv().await.unwrap(), Bytes::from_static(b"ping"));
    }

    #[tokio::test]
    async fn test_send_to_closed_endpoint_fails() {
        let net = MemoryNetwork::new();
        let a = net.join();
        let b = net.join();
        let location = b.open_endpoint().location().clone();
        let err = a.send(&location, Bytes::new()).await.unwrap_err();
        assert!(matches!(err, WireError::EndpointNotFound(_)));
        assert!(err.is_routing_failure());
    }

    #[tokio::test]
    async fn test_disconnect_notifies_both_sides() {
        let net = MemoryNetwork::new();
        let a = net.join();
        let b = net.join();
        let mut a_lost = a.subscribe_node_lost();
        let mut b_lost = b.subscribe_node_lost();

        assert!(net.disconnect(b.local_node()));
        assert!(!net.disconnect(b.local_node()));
        assert_eq!(net.len(), 1);

        assert_eq!(&a_lost.recv().await.unwrap(), b.local_node());
        assert_eq!(&b_lost.recv().await.unwrap(), a.local_node());
    }

    #[tokio::test]
    async fn test_send_to_disconnected_node_fails() {
        let net = MemoryNetwork::new();
        let a = net.join();
        let b = net.join();
        let ep = b.open_endpoint();
        net.disconnect(b.local_node());

        let err = a.send(ep.location(), Bytes::new()).await.unwrap_err();
        assert!(matches!(err, WireError::NodeUnreachable(_)));

        let err = b
            .send(&ChannelLocation::new(a.local_node().clone(), 64), Bytes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::LinkLost(_)));
    }
}
