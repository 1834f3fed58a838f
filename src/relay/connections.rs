//! Connection manager - player id to live socket handle

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ws::protocol::{encode_server, ServerMsg};

/// Why a frame could not be queued for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    #[error("Connection is closing")]
    Closing,

    #[error("Connection is closed")]
    Closed,

    #[error("Outbound queue is full")]
    Backpressure,
}

/// Sending half of a connection, held by the relay.
///
/// Frames go through a bounded queue drained by the connection's writer task,
/// so a stalled peer only ever loses its own frames.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    outbound: mpsc::Sender<String>,
    close: Arc<watch::Sender<bool>>,
}

/// Receiving half of a connection, owned by its socket session
#[derive(Debug)]
pub struct Outbox {
    pub frames: mpsc::Receiver<String>,
    pub close: watch::Receiver<bool>,
}

impl ConnectionHandle {
    /// Create a handle and the outbox its socket session drains
    pub fn channel(capacity: usize) -> (Self, Outbox) {
        let (outbound, frames) = mpsc::channel(capacity.max(1));
        let (close, close_rx) = watch::channel(false);

        let handle = Self {
            outbound,
            close: Arc::new(close),
        };
        let outbox = Outbox {
            frames,
            close: close_rx,
        };
        (handle, outbox)
    }

    /// True until a close is requested or the session drops its outbox
    pub fn is_open(&self) -> bool {
        !*self.close.borrow() && !self.outbound.is_closed()
    }

    /// Queue one text frame without waiting
    pub fn send(&self, frame: String) -> Result<(), SendError> {
        if *self.close.borrow() {
            return Err(SendError::Closing);
        }
        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::Backpressure,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Ask the session to close the socket
    pub fn close(&self) {
        self.close.send_replace(true);
    }
}

/// Registry of live connections keyed by player id
#[derive(Debug, Default)]
pub struct ConnectionManager {
    handles: DashMap<Uuid, ConnectionHandle>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: Uuid, handle: ConnectionHandle) {
        self.handles.insert(id, handle);
    }

    pub fn unregister(&self, id: Uuid) -> Option<ConnectionHandle> {
        self.handles.remove(&id).map(|(_, handle)| handle)
    }

    pub fn get(&self, id: Uuid) -> Option<ConnectionHandle> {
        self.handles.get(&id).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Send to one connection. Never fails the caller: closed or congested
    /// peers are skipped. Returns whether the frame was queued.
    pub fn send_to(&self, id: Uuid, msg: &ServerMsg) -> bool {
        let Some(handle) = self.get(id) else {
            return false;
        };
        match encode_server(msg) {
            Ok(frame) => deliver(id, &handle, frame, msg.kind()),
            Err(e) => {
                warn!(player_id = %id, error = %e, "Dropping unencodable message");
                false
            }
        }
    }

    /// Send to every connection except `except`. Each recipient is handled
    /// independently. Returns how many frames were queued.
    pub fn broadcast_except(&self, except: Uuid, msg: &ServerMsg) -> usize {
        let frame = match encode_server(msg) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "Dropping unencodable broadcast");
                return 0;
            }
        };

        // Clone handles out first so no shard lock is held while sending
        let recipients: Vec<(Uuid, ConnectionHandle)> = self
            .handles
            .iter()
            .filter(|entry| *entry.key() != except)
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        recipients
            .into_iter()
            .filter(|(id, handle)| deliver(*id, handle, frame.clone(), msg.kind()))
            .count()
    }

    /// Request close and drop bookkeeping whatever the close outcome
    pub fn close_and_forget(&self, id: Uuid) {
        if let Some(handle) = self.unregister(id) {
            if handle.is_open() {
                handle.close();
            }
        }
    }

    /// Close and forget every connection
    pub fn close_all(&self) -> usize {
        let ids: Vec<Uuid> = self.handles.iter().map(|entry| *entry.key()).collect();
        for id in &ids {
            self.close_and_forget(*id);
        }
        ids.len()
    }
}

fn deliver(id: Uuid, handle: &ConnectionHandle, frame: String, kind: &str) -> bool {
    match handle.send(frame) {
        Ok(()) => true,
        Err(e) => {
            debug!(player_id = %id, kind, error = %e, "Dropped outbound message");
            false
        }
    }
}
