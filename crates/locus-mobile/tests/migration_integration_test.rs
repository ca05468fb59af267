//! Integration tests for migratable channels.
//!
//! Every test runs a real directory task and several nodes on one
//! in-process network, moving channel ends between nodes the way an
//! application would: prepare, serialize, ship the JSON, arrive.

use async_trait::async_trait;
use bytes::Bytes;
use locus_directory::{DirectoryHandle, DirectoryServer};
use locus_mobile::{
    InputHandoff, MigratableInput, MobilityError, NamedChannels, NodeContext, MAX_WRITE_ATTEMPTS,
};
use locus_types::{AccessScope, ChannelLocation, NodeId};
use locus_wire::{Endpoint, MemoryNetwork, MemoryTransport, Transport, WireError, WireResult};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Reading {
    sensor: String,
    value: i64,
}

fn reading(value: i64) -> Reading {
    Reading {
        sensor: "probe".to_string(),
        value,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Cluster {
    net: MemoryNetwork,
    directory: DirectoryHandle,
}

impl Cluster {
    fn start() -> Self {
        let net = MemoryNetwork::new();
        let directory = DirectoryServer::spawn(net.join()).unwrap();
        Self { net, directory }
    }

    async fn node(&self) -> NamedChannels {
        self.node_on(self.net.join()).await
    }

    async fn node_on(&self, transport: Arc<dyn Transport>) -> NamedChannels {
        let ctx = NodeContext::logon(transport, self.directory.node().clone())
            .await
            .unwrap();
        NamedChannels::new(ctx)
    }
}

/// Ship a prepared input as JSON and rebuild it on `dest`.
fn ship(input: &MigratableInput<Reading>, dest: &NamedChannels) -> MigratableInput<Reading> {
    let json = serde_json::to_string(input).unwrap();
    let handoff: InputHandoff = serde_json::from_str(&json).unwrap();
    MigratableInput::arrive(handoff, dest.context().clone())
}

/// Wraps a memory transport and counts sends to one watched location.
struct CountingTransport {
    inner: Arc<MemoryTransport>,
    watched: Mutex<Option<ChannelLocation>>,
    sends: AtomicUsize,
}

impl CountingTransport {
    fn new(inner: Arc<MemoryTransport>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            watched: Mutex::new(None),
            sends: AtomicUsize::new(0),
        })
    }

    fn watch(&self, location: ChannelLocation) {
        *self.watched.lock().unwrap() = Some(location);
    }

    fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for CountingTransport {
    fn local_node(&self) -> &NodeId {
        self.inner.local_node()
    }

    fn open_endpoint(&self) -> Endpoint {
        self.inner.open_endpoint()
    }

    fn open_numbered_endpoint(&self, index: u64) -> WireResult<Endpoint> {
        self.inner.open_numbered_endpoint(index)
    }

    async fn send(&self, to: &ChannelLocation, payload: Bytes) -> WireResult<()> {
        if self.watched.lock().unwrap().as_ref() == Some(to) {
            self.sends.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.send(to, payload).await
    }

    fn subscribe_node_lost(&self) -> broadcast::Receiver<NodeId> {
        self.inner.subscribe_node_lost()
    }
}

// ---------------------------------------------------------------------------
// Plain named channels
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_named_channel_carries_values() {
    let cluster = Cluster::start();
    let a = cluster.node().await;
    let b = cluster.node().await;

    let mut input = a.named_input::<Reading>("readings").await.unwrap();
    let mut output = b.named_output::<Reading>("readings").await.unwrap();

    output.write(&reading(1)).await.unwrap();
    output.write(&reading(2)).await.unwrap();
    assert_eq!(input.read().await.unwrap(), reading(1));
    assert_eq!(input.read().await.unwrap(), reading(2));
}

#[tokio::test]
async fn test_scoped_channels_are_separate() {
    let cluster = Cluster::start();
    let a = cluster.node().await;
    let team = AccessScope::named("team");

    let mut global = a.named_input::<Reading>("readings").await.unwrap();
    let mut scoped = a
        .named_input_scoped::<Reading>("readings", team.clone())
        .await
        .unwrap();
    let mut out = a
        .named_output_scoped::<Reading>("readings", team)
        .await
        .unwrap();

    out.write(&reading(7)).await.unwrap();
    assert_eq!(scoped.read().await.unwrap(), reading(7));
    assert!(global.manager().is_connected());
    assert!(
        tokio::time::timeout(Duration::from_millis(50), global.read())
            .await
            .is_err()
    );
}

// ---------------------------------------------------------------------------
// Migration
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_input_moves_and_writer_follows() {
    let cluster = Cluster::start();
    let source = cluster.node().await;
    let dest = cluster.node().await;
    let writer = cluster.node().await;

    let mut input = source.named_input::<Reading>("mover").await.unwrap();
    let mut output = writer.named_output::<Reading>("mover").await.unwrap();
    output.write(&reading(1)).await.unwrap();
    assert_eq!(input.read().await.unwrap(), reading(1));

    input.prepare_to_move().await.unwrap();
    let mut moved = ship(&input, &dest);
    drop(input);

    // The writer blocks while the name is leased...
    let pending = tokio::spawn(async move {
        let result = output.write(&reading(2)).await;
        result.map(|()| output)
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!pending.is_finished());

    // ...and completes once the input is rebuilt at its destination.
    let got = tokio::time::timeout(WAIT, moved.read())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got, reading(2));
    let mut output = tokio::time::timeout(WAIT, pending)
        .await
        .unwrap()
        .unwrap()
        .unwrap();

    let location = moved.location().await.unwrap();
    assert_eq!(location.node(), dest.context().node());
    assert_eq!(output.manager().target(), Some(&location));

    output.write(&reading(3)).await.unwrap();
    assert_eq!(moved.read().await.unwrap(), reading(3));
}

#[tokio::test]
async fn test_anonymous_input_moves_and_location_writer_follows() {
    let cluster = Cluster::start();
    let source = cluster.node().await;
    let dest = cluster.node().await;
    let writer = cluster.node().await;

    let mut input = source.anonymous_input::<Reading>().await.unwrap();
    let original = input.location().await.unwrap();
    let mut output = writer.output_to::<Reading>(original.clone());
    output.write(&reading(10)).await.unwrap();
    assert_eq!(input.read().await.unwrap(), reading(10));

    input.prepare_to_move().await.unwrap();
    let mut moved = ship(&input, &dest);
    drop(input);
    let new_location = moved.location().await.unwrap();
    assert_ne!(new_location, original);

    output.write(&reading(11)).await.unwrap();
    assert_eq!(moved.read().await.unwrap(), reading(11));
    assert_eq!(output.manager().target(), Some(&new_location));
}

#[tokio::test]
async fn test_input_moves_twice() {
    let cluster = Cluster::start();
    let first = cluster.node().await;
    let second = cluster.node().await;
    let third = cluster.node().await;
    let writer = cluster.node().await;

    let mut input = first.named_input::<Reading>("nomad").await.unwrap();
    let mut output = writer.named_output::<Reading>("nomad").await.unwrap();

    input.prepare_to_move().await.unwrap();
    let mut input = ship(&input, &second);
    input.location().await.unwrap();
    input.prepare_to_move().await.unwrap();
    let mut input = ship(&input, &third);
    input.location().await.unwrap();

    output.write(&reading(5)).await.unwrap();
    assert_eq!(input.read().await.unwrap(), reading(5));
}

#[tokio::test]
async fn test_stale_handoff_cannot_rebind() {
    let cluster = Cluster::start();
    let source = cluster.node().await;
    let dest = cluster.node().await;
    let rival = cluster.node().await;

    let mut input = source.named_input::<Reading>("guarded").await.unwrap();
    input.prepare_to_move().await.unwrap();
    let handoff = input.handoff().unwrap();

    let mut moved = MigratableInput::<Reading>::arrive(handoff.clone(), dest.context().clone());
    moved.location().await.unwrap();

    // The key was renewed on arrival, so a copy of the old hand-off is refused.
    let mut copy = MigratableInput::<Reading>::arrive(handoff, rival.context().clone());
    let err = copy.location().await.unwrap_err();
    assert!(matches!(err, MobilityError::Construction(_)));
}

#[tokio::test]
async fn test_unprepared_input_does_not_serialize() {
    let cluster = Cluster::start();
    let a = cluster.node().await;
    let input = a.named_input::<Reading>("fixed").await.unwrap();
    assert!(serde_json::to_string(&input).is_err());
}

// ---------------------------------------------------------------------------
// Write retry bound
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_write_gives_up_after_max_attempts() {
    let cluster = Cluster::start();
    let owner = cluster.node().await;

    // Publish an anonymous input, then drop it without deregistering: the
    // name still resolves to an endpoint nobody listens on.
    let mut input = owner.anonymous_input::<Reading>().await.unwrap();
    let ghost = input.location().await.unwrap();
    drop(input);

    let counting = CountingTransport::new(cluster.net.join());
    counting.watch(ghost.clone());
    let writer = cluster.node_on(counting.clone()).await;
    let mut output = writer.output_to::<Reading>(ghost);

    let err = tokio::time::timeout(WAIT, output.write(&reading(0)))
        .await
        .unwrap()
        .unwrap_err();
    match err {
        MobilityError::Write { attempts, source } => {
            assert_eq!(attempts, MAX_WRITE_ATTEMPTS);
            assert!(matches!(source, WireError::EndpointNotFound(_)));
        }
        other => panic!("expected write failure, got {other:?}"),
    }
    assert_eq!(counting.sends(), MAX_WRITE_ATTEMPTS as usize);
}
