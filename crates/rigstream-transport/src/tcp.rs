//! TCP stream transport

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use rigstream_core::{RigError, RigResult};

use crate::{ConnectionId, InboundQueue, Line, LineDecoder, TransportEvent, MAX_LINE_LENGTH};

/// Bytes requested from the socket per read
const READ_CHUNK: usize = 8 * 1024;

/// Outbound line sender for one connection
pub type LineSender = mpsc::UnboundedSender<String>;

struct PeerHandle {
    outbound: LineSender,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl PeerHandle {
    fn abort(&self) {
        self.reader.abort();
        self.writer.abort();
    }
}

type PeerMap = Arc<Mutex<HashMap<ConnectionId, PeerHandle>>>;

struct Listening {
    local_addr: SocketAddr,
    accept_task: JoinHandle<()>,
}

/// Line-oriented TCP transport
pub struct StreamTransport {
    queue: Arc<InboundQueue>,
    peers: PeerMap,
    listening: Option<Listening>,
    max_line_length: usize,
}

impl StreamTransport {
    pub fn new(queue_capacity: usize) -> Self {
        StreamTransport {
            queue: Arc::new(InboundQueue::new(queue_capacity)),
            peers: Arc::new(Mutex::new(HashMap::new())),
            listening: None,
            max_line_length: MAX_LINE_LENGTH,
        }
    }

    /// Limit inbound lines to `max` bytes; longer ones are skipped
    pub fn with_max_line_length(mut self, max: usize) -> Self {
        self.max_line_length = max;
        self
    }

    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }

    /// Bind and start accepting connections.
    ///
    /// If the requested port is taken, retries once on an ephemeral port of
    /// the same interface. Returns the port actually bound.
    pub async fn start(&mut self, addr: SocketAddr) -> RigResult<u16> {
        if self.listening.is_some() {
            return Err(RigError::AlreadyRunning);
        }

        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) if e.kind() == ErrorKind::AddrInUse && addr.port() != 0 => {
                tracing::warn!("Port {} in use, falling back to an ephemeral port", addr.port());
                TcpListener::bind(SocketAddr::new(addr.ip(), 0))
                    .await
                    .map_err(|e| RigError::Transport(e.to_string()))?
            }
            Err(e) => return Err(RigError::Transport(e.to_string())),
        };

        let local_addr = listener
            .local_addr()
            .map_err(|e| RigError::Transport(e.to_string()))?;

        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.queue),
            Arc::clone(&self.peers),
            self.max_line_length,
        ));

        tracing::info!("Listening on {}", local_addr);
        self.listening = Some(Listening {
            local_addr,
            accept_task,
        });
        Ok(local_addr.port())
    }

    pub fn is_started(&self) -> bool {
        self.listening.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listening.as_ref().map(|l| l.local_addr)
    }

    /// Shared inbound queue, for the I/O layer to push into
    pub fn queue(&self) -> Arc<InboundQueue> {
        Arc::clone(&self.queue)
    }

    /// Push an event as if it had arrived from the network
    pub fn enqueue_incoming(&self, event: TransportEvent) -> bool {
        self.queue.push(event)
    }

    /// Everything received since the last drain, never blocking
    pub fn drain(&self) -> Vec<TransportEvent> {
        self.queue.drain()
    }

    /// Messages dropped on overflow since the last call
    pub fn take_dropped(&self) -> usize {
        self.queue.take_dropped()
    }

    /// Queue one line for sending; the terminator is added here
    pub fn send(&self, id: ConnectionId, line: impl Into<String>) -> RigResult<()> {
        let peers = self.peers.lock();
        let peer = peers.get(&id).ok_or(RigError::NotConnected)?;
        peer.outbound
            .send(line.into())
            .map_err(|_| RigError::Transport(format!("{} closed", id)))
    }

    /// Drop one connection without emitting a disconnect event
    pub fn close(&self, id: ConnectionId) {
        if let Some(peer) = self.peers.lock().remove(&id) {
            peer.abort();
            tracing::debug!("Closed {}", id);
        }
        self.queue.release(id);
    }

    pub fn connection_count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Stop listening and close every connection. No-op when not started.
    pub async fn stop(&mut self) {
        let Some(listening) = self.listening.take() else {
            return;
        };
        listening.accept_task.abort();
        // Wait for the listener to be dropped so the port is free again
        let _ = listening.accept_task.await;

        let peers: Vec<_> = self.peers.lock().drain().map(|(_, p)| p).collect();
        for peer in peers {
            peer.abort();
            let _ = peer.reader.await;
            let _ = peer.writer.await;
        }
        self.queue.reset();
        tracing::info!("Transport on {} stopped", listening.local_addr);
    }
}

impl Drop for StreamTransport {
    fn drop(&mut self) {
        if let Some(listening) = &self.listening {
            listening.accept_task.abort();
        }
        for peer in self.peers.lock().values() {
            peer.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    queue: Arc<InboundQueue>,
    peers: PeerMap,
    max_line_length: usize,
) {
    let mut next_id = 1u64;
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let id = ConnectionId(next_id);
                next_id += 1;
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!("set_nodelay on {} failed: {}", id, e);
                }
                tracing::info!("Accepted {} from {}", id, peer);
                queue.push(TransportEvent::Connected { id, peer });
                spawn_peer(id, stream, &queue, &peers, max_line_length);
            }
            Err(e) => {
                tracing::warn!("TCP accept error: {}", e);
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }
}

fn spawn_peer(
    id: ConnectionId,
    stream: TcpStream,
    queue: &Arc<InboundQueue>,
    peers: &PeerMap,
    max_line_length: usize,
) {
    let (read_half, write_half) = stream.into_split();
    let (tx, rx) = mpsc::unbounded_channel();

    // Hold the map lock across the spawn so the reader cannot remove
    // its entry before it is inserted
    let mut map = peers.lock();
    let reader = tokio::spawn(read_loop(
        id,
        read_half,
        LineDecoder::new(max_line_length),
        Arc::clone(queue),
        Arc::clone(peers),
    ));
    let writer = tokio::spawn(write_loop(id, write_half, rx));
    map.insert(
        id,
        PeerHandle {
            outbound: tx,
            reader,
            writer,
        },
    );
}

async fn read_loop(
    id: ConnectionId,
    mut read_half: OwnedReadHalf,
    mut decoder: LineDecoder,
    queue: Arc<InboundQueue>,
    peers: PeerMap,
) {
    let mut buf = BytesMut::with_capacity(READ_CHUNK);
    loop {
        while let Some(line) = decoder.decode(&mut buf) {
            deliver(id, line, &queue);
        }
        buf.reserve(READ_CHUNK);
        match read_half.read_buf(&mut buf).await {
            Ok(0) => {
                while let Some(line) = decoder.decode_eof(&mut buf) {
                    deliver(id, line, &queue);
                }
                tracing::info!("{} closed by peer", id);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!("Read error on {}: {}", id, e);
                break;
            }
        }
    }

    if let Some(peer) = peers.lock().remove(&id) {
        peer.writer.abort();
    }
    queue.push(TransportEvent::Disconnected { id });
}

fn deliver(id: ConnectionId, line: Line, queue: &InboundQueue) {
    let event = match line {
        Line::Text(text) if text.is_empty() => return,
        Line::Text(text) => TransportEvent::Message { id, text },
        Line::Malformed(reason) => {
            tracing::warn!("Skipping line from {}: {}", id, reason);
            TransportEvent::Malformed { id, reason }
        }
    };
    queue.push(event);
}

async fn write_loop(id: ConnectionId, mut write_half: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<String>) {
    while let Some(mut line) = rx.recv().await {
        line.push('\n');
        if let Err(e) = write_half.write_all(line.as_bytes()).await {
            tracing::warn!("Write error on {}: {}", id, e);
            break;
        }
    }
}
