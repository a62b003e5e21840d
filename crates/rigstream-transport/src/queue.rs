//! Inbound event queue
//!
//! Pushed from the connection tasks, drained by the session tick. Only
//! line payloads count toward the capacity: connection lifecycle events
//! are always kept so the session never loses track of its peer.
//!
//! The first connection that comes up is admitted. Lines from any other
//! connection are discarded while it is live, so a second peer can never
//! crowd the admitted one out of the queue.

use std::collections::VecDeque;
use std::net::SocketAddr;

use parking_lot::Mutex;

/// Identifier of one accepted connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Something the I/O layer observed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected { id: ConnectionId, peer: SocketAddr },
    /// One complete line, without its terminator
    Message { id: ConnectionId, text: String },
    /// A line that was skipped: invalid UTF-8 or too long
    Malformed { id: ConnectionId, reason: String },
    Disconnected { id: ConnectionId },
}

impl TransportEvent {
    pub fn connection(&self) -> ConnectionId {
        match self {
            TransportEvent::Connected { id, .. }
            | TransportEvent::Message { id, .. }
            | TransportEvent::Malformed { id, .. }
            | TransportEvent::Disconnected { id } => *id,
        }
    }

    fn is_payload(&self) -> bool {
        matches!(
            self,
            TransportEvent::Message { .. } | TransportEvent::Malformed { .. }
        )
    }
}

#[derive(Debug, Default)]
struct QueueState {
    events: VecDeque<TransportEvent>,
    messages: usize,
    dropped: usize,
    admitted: Option<ConnectionId>,
}

/// Bounded FIFO of transport events
#[derive(Debug)]
pub struct InboundQueue {
    state: Mutex<QueueState>,
    capacity: usize,
}

impl InboundQueue {
    pub fn new(capacity: usize) -> Self {
        InboundQueue {
            state: Mutex::new(QueueState::default()),
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueue an event. Returns false if a payload was not queued, either
    /// because the queue is full (counted for `take_dropped`) or because it
    /// came from a connection other than the admitted one.
    pub fn push(&self, event: TransportEvent) -> bool {
        let mut state = self.state.lock();
        match &event {
            TransportEvent::Connected { id, .. } => {
                if state.admitted.is_none() {
                    state.admitted = Some(*id);
                }
            }
            TransportEvent::Disconnected { id } => {
                if state.admitted == Some(*id) {
                    state.admitted = None;
                }
            }
            _ => {}
        }

        if event.is_payload() {
            let id = event.connection();
            if state.admitted.is_some_and(|admitted| admitted != id) {
                tracing::trace!("Discarding line from unadmitted {}", id);
                return false;
            }
            if state.messages >= self.capacity {
                state.dropped += 1;
                tracing::warn!(
                    "Inbound queue full ({} messages), dropping message from {}",
                    self.capacity,
                    id
                );
                return false;
            }
            state.messages += 1;
        }
        state.events.push_back(event);
        true
    }

    /// Connection whose lines are currently accepted
    pub fn admitted(&self) -> Option<ConnectionId> {
        self.state.lock().admitted
    }

    /// Forget `id` as the admitted connection, if it is
    pub fn release(&self, id: ConnectionId) {
        let mut state = self.state.lock();
        if state.admitted == Some(id) {
            state.admitted = None;
        }
    }

    /// Take everything queued since the last drain, in arrival order
    pub fn drain(&self) -> Vec<TransportEvent> {
        let mut state = self.state.lock();
        state.messages = 0;
        state.events.drain(..).collect()
    }

    /// Number of messages dropped since the last call
    pub fn take_dropped(&self) -> usize {
        std::mem::take(&mut self.state.lock().dropped)
    }

    /// Discard all events, counters and the admitted connection
    pub fn reset(&self) {
        *self.state.lock() = QueueState::default();
    }

    pub fn len(&self) -> usize {
        self.state.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InboundQueue {
    fn default() -> Self {
        InboundQueue::new(4096)
    }
}
