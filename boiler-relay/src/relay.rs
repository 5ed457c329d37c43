//! The relay actor: sole owner of the [`Registry`].
//!
//! ```text
//!  socket task ──┐
//!  socket task ──┼── RelayEvent (mpsc) ──► Relay ──► Registry
//!  socket task ──┘                          │
//!                                           └── ConnectionHandle::send ──► socket tasks
//! ```
//!
//! Socket tasks never touch the registry. They post events to one task that
//! applies them strictly in arrival order, one at a time, so no partially
//! applied update is ever visible.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::connection::{ConnectionHandle, ConnectionId};
use crate::reconcile::{on_disconnect, Disconnection};
use crate::registry::{Registry, RegistrySnapshot};
use crate::router::{handle_frame, RouteOutcome};

/// Work for the relay task.
#[derive(Debug)]
pub enum RelayEvent {
    /// A text frame arrived on `connection`
    Frame {
        connection: ConnectionHandle,
        text: String,
    },
    /// A socket closed or failed
    Disconnected(ConnectionId),
    /// Copy out the registry
    Snapshot(oneshot::Sender<RegistrySnapshot>),
    /// Copy out the counters
    Stats(oneshot::Sender<RelayStats>),
}

/// Counters kept by the relay task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub frames_applied: u64,
    pub frames_ignored: u64,
    pub frames_rejected: u64,
    pub boiler_disconnects: u64,
    pub app_disconnects: u64,
}

impl RelayStats {
    fn record_frame(&mut self, outcome: RouteOutcome) {
        match outcome {
            RouteOutcome::Applied => self.frames_applied += 1,
            RouteOutcome::Ignored => self.frames_ignored += 1,
            RouteOutcome::Rejected => self.frames_rejected += 1,
        }
    }

    fn record_disconnect(&mut self, disconnection: &Disconnection) {
        match disconnection {
            Disconnection::Boiler { .. } => self.boiler_disconnects += 1,
            Disconnection::App(_) => self.app_disconnects += 1,
            Disconnection::Unknown => {}
        }
    }
}

/// The relay task has stopped and no longer accepts events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Relay task has stopped")]
pub struct RelayClosed;

/// Cloneable sender side of the relay.
#[derive(Debug, Clone)]
pub struct RelayHandle {
    tx: mpsc::Sender<RelayEvent>,
}

impl RelayHandle {
    /// Hand a received frame to the relay.
    pub async fn frame(&self, connection: ConnectionHandle, text: String) -> Result<(), RelayClosed> {
        self.send(RelayEvent::Frame { connection, text }).await
    }

    /// Report that a socket is gone.
    pub async fn disconnected(&self, connection: ConnectionId) -> Result<(), RelayClosed> {
        self.send(RelayEvent::Disconnected(connection)).await
    }

    /// Current registry contents, after every event queued before this call.
    pub async fn snapshot(&self) -> Result<RegistrySnapshot, RelayClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayEvent::Snapshot(reply)).await?;
        rx.await.map_err(|_| RelayClosed)
    }

    pub async fn stats(&self) -> Result<RelayStats, RelayClosed> {
        let (reply, rx) = oneshot::channel();
        self.send(RelayEvent::Stats(reply)).await?;
        rx.await.map_err(|_| RelayClosed)
    }

    async fn send(&self, event: RelayEvent) -> Result<(), RelayClosed> {
        self.tx.send(event).await.map_err(|_| RelayClosed)
    }
}

/// The relay task state.
pub struct Relay {
    registry: Registry,
    events: mpsc::Receiver<RelayEvent>,
    stats: RelayStats,
}

impl Relay {
    /// Create a relay with an empty registry. `capacity` bounds the event
    /// queue shared by all sockets.
    pub fn new(capacity: usize) -> (Self, RelayHandle) {
        let (tx, events) = mpsc::channel(capacity.max(1));
        let relay = Self {
            registry: Registry::new(),
            events,
            stats: RelayStats::default(),
        };
        (relay, RelayHandle { tx })
    }

    /// Create a relay and run it on the current tokio runtime.
    pub fn spawn(capacity: usize) -> (RelayHandle, JoinHandle<Registry>) {
        let (relay, handle) = Self::new(capacity);
        (handle, tokio::spawn(relay.run()))
    }

    /// Process events until every [`RelayHandle`] is dropped, then return
    /// the final registry.
    pub async fn run(mut self) -> Registry {
        while let Some(event) = self.events.recv().await {
            self.apply(event);
        }
        log::debug!("Relay stopped: all handles dropped");
        self.registry
    }

    fn apply(&mut self, event: RelayEvent) {
        match event {
            RelayEvent::Frame { connection, text } => {
                let outcome = handle_frame(&mut self.registry, &text, &connection);
                self.stats.record_frame(outcome);
            }
            RelayEvent::Disconnected(connection) => {
                let disconnection = on_disconnect(&mut self.registry, connection);
                self.stats.record_disconnect(&disconnection);
            }
            RelayEvent::Snapshot(reply) => {
                let _ = reply.send(self.registry.snapshot());
            }
            RelayEvent::Stats(reply) => {
                let _ = reply.send(self.stats);
            }
        }
    }
}
