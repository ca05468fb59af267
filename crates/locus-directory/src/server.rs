//! The directory registry process.
//!
//! One task owns the [`Registry`] and serves the well-known directory
//! endpoint. Node-lost notifications are always handled before protocol
//! messages, so a request is never answered from state that still includes
//! a node already reported gone.

use crate::registry::{Outgoing, Registry};
use locus_types::location::DIRECTORY_INDEX;
use locus_types::{ChannelLocation, NodeId};
use locus_wire::{decode_message, encode_message, Endpoint, Transport, WireResult};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A running directory server.
pub struct DirectoryServer {
    transport: Arc<dyn Transport>,
    registry: Registry,
    inbox: Endpoint,
    lost_rx: broadcast::Receiver<NodeId>,
    shutdown_rx: watch::Receiver<bool>,
}

/// Control handle for a spawned [`DirectoryServer`].
///
/// Dropping the handle stops the server.
pub struct DirectoryHandle {
    location: ChannelLocation,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl DirectoryHandle {
    /// Where clients send directory requests.
    pub fn location(&self) -> &ChannelLocation {
        &self.location
    }

    /// The node hosting the directory, which clients log on to.
    pub fn node(&self) -> &NodeId {
        self.location.node()
    }

    /// Ask the server to stop.
    pub fn shutdown(&self) {
        info!(location = %self.location, "Directory shutting down");
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for the server task to finish.
    pub async fn join(self) {
        let Self {
            task, shutdown_tx, ..
        } = self;
        if let Err(e) = task.await {
            warn!(error = %e, "Directory task ended abnormally");
        }
        drop(shutdown_tx);
    }
}

impl DirectoryServer {
    /// Start a directory on `transport`'s node, serving the well-known
    /// directory endpoint.
    pub fn spawn(transport: Arc<dyn Transport>) -> WireResult<DirectoryHandle> {
        let inbox = transport.open_numbered_endpoint(DIRECTORY_INDEX)?;
        let lost_rx = transport.subscribe_node_lost();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let location = inbox.location().clone();
        info!(location = %location, "Directory started");

        let server = Self {
            transport,
            registry: Registry::new(),
            inbox,
            lost_rx,
            shutdown_rx,
        };
        let task = tokio::spawn(server.run());
        Ok(DirectoryHandle {
            location,
            shutdown_tx,
            task,
        })
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;

                changed = self.shutdown_rx.changed() => {
                    if changed.is_err() || *self.shutdown_rx.borrow() {
                        break;
                    }
                }
                lost = self.lost_rx.recv() => match lost {
                    Ok(node) => self.registry.node_lost(&node),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "Directory missed node-lost notifications");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                frame = self.inbox.recv() => match frame {
                    Some(frame) => self.handle_frame(&frame),
                    None => break,
                },
            }
        }
        let stats = self.registry.stats();
        info!(
            nodes = stats.nodes,
            bound = stats.bound,
            leased = stats.leased,
            pending = stats.pending,
            "Directory stopped"
        );
    }

    fn handle_frame(&mut self, frame: &[u8]) {
        let msg = match decode_message(frame) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(error = %e, "Dropping undecodable directory frame");
                return;
            }
        };
        debug!(kind = ?msg.kind, name = %msg.name, "Directory request");
        let replies = self.registry.handle(msg);
        notify_all(&self.transport, replies);
    }
}

/// Deliver replies in order from a background task. Failures are logged and
/// otherwise ignored.
pub fn notify_all(transport: &Arc<dyn Transport>, replies: Vec<Outgoing>) {
    if replies.is_empty() {
        return;
    }
    let transport = Arc::clone(transport);
    tokio::spawn(async move {
        for Outgoing { to, message } in replies {
            let frame = match encode_message(&message) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(to = %to, error = %e, "Failed to encode directory reply");
                    continue;
                }
            };
            if let Err(e) = transport.send(&to, frame).await {
                warn!(to = %to, kind = ?message.kind, error = %e, "Directory reply not delivered");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use locus_wire::{DirectoryMessage, MemoryNetwork, MessageKind};
    use std::time::Duration;

    async fn reply(ep: &mut Endpoint) -> DirectoryMessage {
        let frame = tokio::time::timeout(Duration::from_secs(5), ep.recv())
            .await
            .unwrap()
            .unwrap();
        decode_message(&frame).unwrap()
    }

    #[tokio::test]
    async fn test_serves_logon() {
        let net = MemoryNetwork::new();
        let handle = DirectoryServer::spawn(net.join()).unwrap();
        assert_eq!(handle.location().index(), DIRECTORY_INDEX);

        let client = net.join();
        let mut ep = client.open_endpoint();
        let frame = encode_message(&DirectoryMessage::logon(ep.location().clone())).unwrap();
        client.send(handle.location(), frame).await.unwrap();

        let msg = reply(&mut ep).await;
        assert_eq!(msg.kind, MessageKind::LogonReply);
        assert!(msg.success);
    }

    #[tokio::test]
    async fn test_second_directory_on_same_node_refused() {
        let net = MemoryNetwork::new();
        let node = net.join();
        let _first = DirectoryServer::spawn(node.clone()).unwrap();
        assert!(DirectoryServer::spawn(node).is_err());
    }

    #[tokio::test]
    async fn test_garbage_frames_do_not_stop_server() {
        let net = MemoryNetwork::new();
        let handle = DirectoryServer::spawn(net.join()).unwrap();
        let client = net.join();
        client
            .send(handle.location(), bytes::Bytes::from_static(&[0xEE, 0, 1]))
            .await
            .unwrap();

        let mut ep = client.open_endpoint();
        let frame = encode_message(&DirectoryMessage::logon(ep.location().clone())).unwrap();
        client.send(handle.location(), frame).await.unwrap();
        assert!(reply(&mut ep).await.success);
    }

    #[tokio::test]
    async fn test_shutdown_stops_task() {
        let net = MemoryNetwork::new();
        let handle = DirectoryServer::spawn(net.join()).unwrap();
        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle.join())
            .await
            .unwrap();
    }
}
