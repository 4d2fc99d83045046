//! [`ConnectionManager`] – the broadcast set of connected clients.
//!
//! Every client owns a bounded outbound queue drained by its own socket
//! task.  Delivery uses `try_send` only: a client whose queue is full or
//! closed is removed on the spot, so one slow browser never delays the
//! others (or the bridge).
//!
//! Liveness works like a heartbeat watchdog: any inbound frame refreshes a
//! client's `last_seen`, and [`ConnectionManager::reap_silent`] removes
//! clients that have been quiet longer than their timeout.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use uuid::Uuid;

/// Frames buffered per client before it counts as too slow.
pub const CLIENT_BUFFER: usize = 256;

/// A client silent for this long is dropped.
pub const CLIENT_TIMEOUT: Duration = Duration::from_secs(45);

/// One frame queued for a client's socket task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialised telemetry or a control reply.
    Text(String),
    /// WebSocket-level ping frame.
    Ping,
}

struct Client {
    peer: SocketAddr,
    tx: mpsc::Sender<Outbound>,
    last_seen: Instant,
}

#[derive(Default)]
pub struct ConnectionManager {
    clients: Mutex<HashMap<Uuid, Client>>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn clients(&self) -> MutexGuard<'_, HashMap<Uuid, Client>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a client; the returned receiver feeds its socket task.
    pub fn register(&self, peer: SocketAddr) -> (Uuid, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);
        let id = Uuid::new_v4();
        self.clients().insert(
            id,
            Client {
                peer,
                tx,
                last_seen: Instant::now(),
            },
        );
        debug!(%id, %peer, "client connected");
        (id, rx)
    }

    pub fn remove(&self, id: Uuid) -> bool {
        self.clients().remove(&id).is_some()
    }

    pub fn len(&self) -> usize {
        self.clients().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record inbound traffic from `id`.
    pub fn touch(&self, id: Uuid) {
        if let Some(client) = self.clients().get_mut(&id) {
            client.last_seen = Instant::now();
        }
    }

    /// Queue `frame` for one client.  Returns `false` (and drops the client)
    /// when its queue is full or closed.
    pub fn send_to(&self, id: Uuid, frame: Outbound) -> bool {
        let mut clients = self.clients();
        let Some(client) = clients.get(&id) else {
            return false;
        };
        match client.tx.try_send(frame) {
            Ok(()) => true,
            Err(e) => {
                let peer = client.peer;
                clients.remove(&id);
                log_drop(id, peer, &e);
                false
            }
        }
    }

    /// Queue `frame` for every client.  Returns how many were dropped.
    pub fn broadcast(&self, frame: &Outbound) -> usize {
        let mut clients = self.clients();
        let before = clients.len();
        clients.retain(|&id, client| match client.tx.try_send(frame.clone()) {
            Ok(()) => true,
            Err(e) => {
                log_drop(id, client.peer, &e);
                false
            }
        });
        before - clients.len()
    }

    /// Drop every client whose last inbound frame is older than `timeout`.
    pub fn reap_silent(&self, timeout: Duration) -> Vec<Uuid> {
        let now = Instant::now();
        let mut reaped = Vec::new();
        self.clients().retain(|&id, client| {
            let alive = now.duration_since(client.last_seen) <= timeout;
            if !alive {
                warn!(%id, peer = %client.peer, "client missed heartbeats; dropping");
                reaped.push(id);
            }
            alive
        });
        reaped
    }
}

fn log_drop(id: Uuid, peer: SocketAddr, err: &TrySendError<Outbound>) {
    match err {
        TrySendError::Full(_) => warn!(%id, %peer, "client too slow; dropping"),
        TrySendError::Closed(_) => debug!(%id, %peer, "client gone; dropping"),
    }
}
