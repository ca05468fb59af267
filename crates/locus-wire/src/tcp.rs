//! TCP transport.
//!
//! Every frame on a link is `[len:u32][kind:u8][body]`, `len` counting the
//! kind byte and body. A connection opens with each side sending `HELLO`
//! carrying its node identity. The dialing side then sends `DATA` frames
//! (`[seq:u64][index:u64][payload]`) and the accepting side answers each
//! with `ACK` or, when no endpoint is open at `index`, `REJECT`. A send
//! completes only when its answer arrives, so a payload is never reported
//! delivered unless it reached a live endpoint.
//!
//! Links are cached per peer address. When a link drops, in-flight sends
//! fail with [`WireError::LinkLost`] and the peer is reported on the
//! node-lost channel.

use crate::endpoint::{Endpoint, EndpointTable};
use crate::error::{WireError, WireResult};
use crate::transport::{Transport, NODE_LOST_CAPACITY};
use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use dashmap::DashMap;
use locus_types::config::TcpConfig;
use locus_types::{ChannelLocation, NodeId};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

const FRAME_HELLO: u8 = 1;
const FRAME_DATA: u8 = 2;
const FRAME_ACK: u8 = 3;
const FRAME_REJECT: u8 = 4;

/// Kind byte plus sequence number plus endpoint index.
const DATA_OVERHEAD: usize = 1 + 8 + 8;

/// An outbound connection to one peer.
struct Link {
    peer: NodeId,
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    pending: DashMap<u64, oneshot::Sender<bool>>,
    closed: AtomicBool,
}

impl Link {
    /// Mark the link dead and fail every in-flight send.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.pending.clear();
    }
}

/// A node reachable over TCP.
pub struct TcpTransport {
    me: Weak<Self>,
    node: NodeId,
    local_addr: SocketAddr,
    config: TcpConfig,
    table: Arc<EndpointTable>,
    links: DashMap<String, Arc<Link>>,
    connect_lock: tokio::sync::Mutex<()>,
    lost_tx: broadcast::Sender<NodeId>,
    next_seq: AtomicU64,
    tasks: Mutex<Vec<AbortHandle>>,
}

impl TcpTransport {
    /// Bind a listener and start accepting peers.
    ///
    /// The node identity uses the bound address, so binding port 0 yields an
    /// identity other nodes can dial.
    pub async fn bind(
        listen_addr: &str,
        config: TcpConfig,
    ) -> WireResult<(Arc<Self>, JoinHandle<()>)> {
        let listener = TcpListener::bind(listen_addr).await?;
        let local_addr = listener.local_addr()?;
        let node = NodeId::new(local_addr.to_string());
        info!(node = %node, "TCP transport listening on {local_addr}");

        let (lost_tx, _) = broadcast::channel(NODE_LOST_CAPACITY);
        let transport = Arc::new_cyclic(|me| Self {
            me: me.clone(),
            table: EndpointTable::new(node.clone()),
            node,
            local_addr,
            config,
            links: DashMap::new(),
            connect_lock: tokio::sync::Mutex::new(()),
            lost_tx,
            next_seq: AtomicU64::new(1),
            tasks: Mutex::new(Vec::new()),
        });

        let accept = tokio::spawn(Self::accept_loop(listener, Arc::clone(&transport)));
        transport.track(accept.abort_handle());
        Ok((transport, accept))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Dial `addr` and return the identity of the node listening there.
    pub async fn connect(&self, addr: &str) -> WireResult<NodeId> {
        let _guard = self.connect_lock.lock().await;
        let link = self.open_link(addr).await?;
        Ok(link.peer.clone())
    }

    /// Stop accepting peers and drop every link.
    pub fn shutdown(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
        for entry in self.links.iter() {
            entry.value().close();
        }
        self.links.clear();
        info!(node = %self.node, "TCP transport shut down");
    }

    fn track(&self, handle: AbortHandle) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|t| !t.is_finished());
            tasks.push(handle);
        }
    }

    fn report_lost(&self, peer: &NodeId) {
        debug!(peer = %peer, "Peer lost");
        let _ = self.lost_tx.send(peer.clone());
    }

    /// The cached link to `node`, dialing it if none exists.
    async fn link_for(&self, node: &NodeId) -> WireResult<Arc<Link>> {
        if let Some(link) = self.cached_link(node.address()) {
            return Ok(link);
        }
        let _guard = self.connect_lock.lock().await;
        if let Some(link) = self.cached_link(node.address()) {
            return Ok(link);
        }
        self.open_link(node.address()).await
    }

    fn cached_link(&self, address: &str) -> Option<Arc<Link>> {
        self.links
            .get(address)
            .map(|l| Arc::clone(l.value()))
            .filter(|l| !l.closed.load(Ordering::SeqCst))
    }

    /// Dial a peer and run the HELLO exchange. Callers hold `connect_lock`.
    async fn open_link(&self, addr: &str) -> WireResult<Arc<Link>> {
        let timeout = self.config.connect_timeout();
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| WireError::NodeUnreachable(addr.to_string()))?
            .map_err(|e| {
                debug!("Connect to {addr} failed: {e}");
                WireError::NodeUnreachable(addr.to_string())
            })?;
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();

        let peer = tokio::time::timeout(timeout, async {
            write_frame(&mut writer, FRAME_HELLO, &hello_body(&self.node)?).await?;
            read_hello(&mut reader, self.config.max_frame_size).await
        })
        .await
        .map_err(|_| WireError::HandshakeFailed(format!("timed out greeting {addr}")))??;

        let link = Arc::new(Link {
            peer: peer.clone(),
            writer: tokio::sync::Mutex::new(writer),
            pending: DashMap::new(),
            closed: AtomicBool::new(false),
        });
        if let Some(stale) = self
            .links
            .insert(peer.address().to_string(), Arc::clone(&link))
        {
            stale.close();
        }
        info!(peer = %peer, "Link established");

        let transport = self.me.upgrade().ok_or(WireError::ConnectionClosed)?;
        let reader_link = Arc::clone(&link);
        let task = tokio::spawn(async move {
            transport.link_reader(reader, reader_link).await;
        });
        self.track(task.abort_handle());
        Ok(link)
    }

    /// Resolve acknowledgements on an outbound link until it drops.
    async fn link_reader(&self, mut reader: OwnedReadHalf, link: Arc<Link>) {
        let max = self.config.max_frame_size;
        let reason = loop {
            match read_frame(&mut reader, max).await {
                Ok((kind @ (FRAME_ACK | FRAME_REJECT), mut body)) if body.len() >= 8 => {
                    let seq = body.get_u64();
                    if let Some((_, tx)) = link.pending.remove(&seq) {
                        let _ = tx.send(kind == FRAME_ACK);
                    }
                }
                Ok((kind, _)) => {
                    warn!(peer = %link.peer, kind, "Unexpected frame on outbound link");
                }
                Err(e) => break e,
            }
        };
        debug!(peer = %link.peer, "Outbound link ended: {reason}");
        self.links
            .remove_if(link.peer.address(), |_, current| Arc::ptr_eq(current, &link));
        link.close();
        self.report_lost(&link.peer);
    }

    async fn accept_loop(listener: TcpListener, transport: Arc<Self>) {
        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    debug!("Accepted connection from {addr}");
                    let t = Arc::clone(&transport);
                    let task = tokio::spawn(async move {
                        if let Err(e) = t.handle_inbound(stream).await {
                            debug!("Inbound connection from {addr} ended: {e}");
                        }
                    });
                    transport.track(task.abort_handle());
                }
                Err(e) => {
                    error!("Accept error: {e}");
                    tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                }
            }
        }
    }

    /// Serve one inbound connection: greet, then deliver DATA frames.
    async fn handle_inbound(&self, stream: TcpStream) -> WireResult<()> {
        stream.set_nodelay(true)?;
        let (mut reader, mut writer) = stream.into_split();
        let max = self.config.max_frame_size;

        let peer = tokio::time::timeout(self.config.connect_timeout(), read_hello(&mut reader, max))
            .await
            .map_err(|_| WireError::HandshakeFailed("peer sent no HELLO".into()))??;
        write_frame(&mut writer, FRAME_HELLO, &hello_body(&self.node)?).await?;
        debug!(peer = %peer, "Inbound link established");

        let result = self.serve_inbound(&mut reader, &mut writer, max).await;
        self.report_lost(&peer);
        result
    }

    async fn serve_inbound(
        &self,
        reader: &mut OwnedReadHalf,
        writer: &mut OwnedWriteHalf,
        max: u32,
    ) -> WireResult<()> {
        loop {
            let (kind, mut body) = read_frame(reader, max).await?;
            if kind != FRAME_DATA || body.len() < 16 {
                warn!(kind, "Dropping malformed frame on inbound link");
                continue;
            }
            let seq = body.get_u64();
            let index = body.get_u64();
            let answer = match self.table.deliver(index, body) {
                Ok(()) => FRAME_ACK,
                Err(_) => FRAME_REJECT,
            };
            write_frame(writer, answer, &seq.to_be_bytes()).await?;
        }
    }
}

#[async_trait]
impl Transport for TcpTransport {
    fn local_node(&self) -> &NodeId {
        &self.node
    }

    fn open_endpoint(&self) -> Endpoint {
        self.table.open()
    }

    fn open_numbered_endpoint(&self, index: u64) -> WireResult<Endpoint> {
        self.table.open_numbered(index)
    }

    async fn send(&self, to: &ChannelLocation, payload: Bytes) -> WireResult<()> {
        if to.node() == &self.node {
            return self.table.deliver(to.index(), payload);
        }
        let max = self.config.max_frame_size;
        let size = u32::try_from(DATA_OVERHEAD + payload.len()).unwrap_or(u32::MAX);
        if size > max {
            // Peers drop any link that carries an oversized frame.
            return Err(WireError::FrameTooLarge { size, max });
        }
        let link = self.link_for(to.node()).await?;
        if &link.peer != to.node() {
            // Something else now answers at that address.
            return Err(WireError::LinkLost(to.node().clone()));
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        link.pending.insert(seq, tx);
        if link.closed.load(Ordering::SeqCst) {
            link.pending.remove(&seq);
            return Err(WireError::LinkLost(to.node().clone()));
        }

        let mut body = BytesMut::with_capacity(16 + payload.len());
        body.put_u64(seq);
        body.put_u64(to.index());
        body.put_slice(&payload);
        let written = {
            let mut writer = link.writer.lock().await;
            write_frame(&mut *writer, FRAME_DATA, &body).await
        };
        if let Err(e) = written {
            debug!(peer = %link.peer, "Write failed: {e}");
            link.pending.remove(&seq);
            return Err(WireError::LinkLost(to.node().clone()));
        }

        match rx.await {
            Ok(true) => Ok(()),
            Ok(false) => Err(WireError::EndpointNotFound(to.clone())),
            Err(_) => Err(WireError::LinkLost(to.node().clone())),
        }
    }

    fn subscribe_node_lost(&self) -> broadcast::Receiver<NodeId> {
        self.lost_tx.subscribe()
    }
}

fn hello_body(node: &NodeId) -> WireResult<Vec<u8>> {
    let id = node.to_string();
    let len = u16::try_from(id.len()).map_err(|_| WireError::StringTooLong {
        len: id.len(),
        max: u16::MAX as usize,
    })?;
    let mut body = Vec::with_capacity(2 + id.len());
    body.extend_from_slice(&len.to_be_bytes());
    body.extend_from_slice(id.as_bytes());
    Ok(body)
}

async fn read_hello<R: AsyncRead + Unpin>(reader: &mut R, max: u32) -> WireResult<NodeId> {
    let (kind, mut body) = read_frame(reader, max).await?;
    if kind != FRAME_HELLO || body.len() < 2 {
        return Err(WireError::HandshakeFailed(format!(
            "expected HELLO, got frame kind {kind}"
        )));
    }
    let len = body.get_u16() as usize;
    if body.len() < len {
        return Err(WireError::Truncated {
            needed: len - body.len(),
        });
    }
    let raw = std::str::from_utf8(&body[..len]).map_err(|_| WireError::InvalidUtf8)?;
    raw.parse()
        .map_err(|e| WireError::HandshakeFailed(format!("bad node id in HELLO: {e}")))
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, kind: u8, body: &[u8]) -> WireResult<()> {
    let len = u32::try_from(1 + body.len()).map_err(|_| WireError::FrameTooLarge {
        size: u32::MAX,
        max: u32::MAX,
    })?;
    let mut frame = BytesMut::with_capacity(5 + body.len());
    frame.put_u32(len);
    frame.put_u8(kind);
    frame.put_slice(body);
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, max: u32) -> WireResult<(u8, Bytes)> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(WireError::ConnectionClosed);
        }
        Err(e) => return Err(WireError::Io(e)),
    }
    let len = u32::from_be_bytes(header);
    if len > max {
        return Err(WireError::FrameTooLarge { size: len, max });
    }
    if len == 0 {
        return Err(WireError::Truncated { needed: 1 });
    }
    let mut frame = vec![0u8; len as usize];
    reader.read_exact(&mut frame).await?;
    let mut frame = Bytes::from(frame);
    let kind = frame.get_u8();
    Ok((kind, frame))
}
