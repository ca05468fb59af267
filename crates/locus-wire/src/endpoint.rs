//! Local channel endpoints.
//!
//! Each node owns an [`EndpointTable`] mapping endpoint indices to the
//! sending half of an unbounded queue. Transports deliver inbound payloads
//! into the table; an [`Endpoint`] holds the receiving half and frees its
//! slot when dropped, after which deliveries to its location fail with
//! [`WireError::EndpointNotFound`].

use crate::error::{WireError, WireResult};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use locus_types::location::FIRST_DYNAMIC_INDEX;
use locus_types::{ChannelLocation, NodeId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// The endpoints open on one node.
pub struct EndpointTable {
    node: NodeId,
    slots: DashMap<u64, mpsc::UnboundedSender<Bytes>>,
    next_index: AtomicU64,
}

impl EndpointTable {
    pub fn new(node: NodeId) -> Arc<Self> {
        Arc::new(Self {
            node,
            slots: DashMap::new(),
            next_index: AtomicU64::new(FIRST_DYNAMIC_INDEX),
        })
    }

    pub fn node(&self) -> &NodeId {
        &self.node
    }

    /// Open an endpoint at the next free dynamic index.
    pub fn open(self: &Arc<Self>) -> Endpoint {
        let index = self.next_index.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.slots.insert(index, tx);
        self.endpoint(index, rx)
    }

    /// Open an endpoint at a well-known index.
    pub fn open_numbered(self: &Arc<Self>, index: u64) -> WireResult<Endpoint> {
        match self.slots.entry(index) {
            Entry::Occupied(_) => Err(WireError::EndpointInUse(index)),
            Entry::Vacant(slot) => {
                let (tx, rx) = mpsc::unbounded_channel();
                slot.insert(tx);
                Ok(self.endpoint(index, rx))
            }
        }
    }

    /// Queue a payload for the endpoint at `index`.
    pub fn deliver(&self, index: u64, payload: Bytes) -> WireResult<()> {
        let missing = || WireError::EndpointNotFound(ChannelLocation::new(self.node.clone(), index));
        let tx = self.slots.get(&index).ok_or_else(missing)?;
        tx.send(payload).map_err(|_| missing())?;
        trace!(index, "Payload delivered");
        Ok(())
    }

    pub fn is_open(&self, index: u64) -> bool {
        self.slots.contains_key(&index)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn close(&self, index: u64) {
        self.slots.remove(&index);
    }

    fn endpoint(self: &Arc<Self>, index: u64, rx: mpsc::UnboundedReceiver<Bytes>) -> Endpoint {
        Endpoint {
            location: ChannelLocation::new(self.node.clone(), index),
            rx,
            table: Arc::clone(self),
        }
    }
}

/// The receiving end of a channel, addressable by its location.
pub struct Endpoint {
    location: ChannelLocation,
    rx: mpsc::UnboundedReceiver<Bytes>,
    table: Arc<EndpointTable>,
}

impl Endpoint {
    pub fn location(&self) -> &ChannelLocation {
        &self.location
    }

    /// Wait for the next payload. Returns `None` once the endpoint can no
    /// longer receive.
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        self.table.close(self.location.index());
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("location", &self.location)
            .finish()
    }
}
