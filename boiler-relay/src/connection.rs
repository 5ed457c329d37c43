//! Transport handles held by the registry.
//!
//! A [`ConnectionHandle`] is the relay's only view of a socket. It can queue
//! a text frame for the connection's writer task, or ask that task to close
//! the socket. Both are fire-and-forget: nothing reports whether the peer
//! ever saw the frame.

use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

/// Identity of one live socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receiving half of a connection, owned by its socket task.
pub struct ConnectionReceiver {
    /// Frames queued by the relay
    pub outbound: mpsc::Receiver<String>,
    /// Fires when the relay wants the socket closed
    pub terminate: Arc<Notify>,
}

/// Cloneable handle to a socket's writer task.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::Sender<String>,
    terminate: Arc<Notify>,
}

impl ConnectionHandle {
    /// Create a handle plus the receiving half for the socket task.
    ///
    /// `capacity` bounds the outbound queue; frames sent while it is full
    /// are dropped.
    pub fn channel(capacity: usize) -> (Self, ConnectionReceiver) {
        let (tx, outbound) = mpsc::channel(capacity.max(1));
        let terminate = Arc::new(Notify::new());
        let handle = Self {
            id: ConnectionId::new(),
            tx,
            terminate: terminate.clone(),
        };
        (handle, ConnectionReceiver { outbound, terminate })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a text frame. Returns whether it was accepted by the queue.
    pub fn send(&self, frame: String) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(frame)) => {
                log::warn!(
                    "Send queue full for connection {}, dropping {} byte frame",
                    self.id,
                    frame.len()
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Ask the socket task to close the connection.
    pub fn terminate(&self) {
        // notify_one stores a permit, so this also works before the task waits.
        self.terminate.notify_one();
    }

    /// Whether the socket task has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}
