//! Fan-out hub that keeps every connected overlay on the latest state.
//!
//! The hub tracks one unbounded sender per connected overlay client and pushes
//! the serialized wire message to all of them on every broadcast. Sends are
//! channel pushes, never network I/O, so a slow or dead client cannot stall
//! delivery to the others; the per-connection writer task owns the socket.
//!
//! Consistency contract: a client that joins mid-session receives the current
//! snapshot immediately on connect, and broadcasts reach all registered
//! clients in issue order. There is no message history; a client that missed a
//! push converges through the join snapshot or the fallback pull endpoint.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use crate::lock::lock_or_recover;
use crate::protocol::OverlayMessage;
use crate::state::{BroadcastState, StateStore, TransitionConfig};

/// Opaque handle for one connected overlay client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u64);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

pub struct BroadcastHub {
    store: Arc<StateStore>,
    clients: Mutex<HashMap<ClientId, UnboundedSender<String>>>,
    next_id: AtomicU64,
}

impl BroadcastHub {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self {
            store,
            clients: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a client and immediately queue the current snapshot for it.
    ///
    /// A client that connects before any state has ever been set receives
    /// nothing; its idle display persists client-side.
    pub fn connect(&self, sender: UnboundedSender<String>) -> ClientId {
        let id = ClientId(self.next_id.fetch_add(1, Ordering::Relaxed));
        // Snapshot and registration happen under the same lock that serializes
        // broadcasts, so a join racing a broadcast still ends on the newer of
        // the two values.
        let mut clients = lock_or_recover(&self.clients, "hub connect");
        let (state, transition) = self.store.snapshot();
        if let Some(state) = state {
            if let Some(json) = encode(OverlayMessage::state(state, transition)) {
                let _ = sender.send(json);
            }
        }
        clients.insert(id, sender);
        info!("overlay {id} connected");
        id
    }

    /// Remove a client. Safe to call repeatedly or after the client is gone.
    pub fn disconnect(&self, id: ClientId) {
        if lock_or_recover(&self.clients, "hub disconnect")
            .remove(&id)
            .is_some()
        {
            info!("overlay {id} disconnected");
        }
    }

    /// Push a full state message to every connected client.
    ///
    /// Clients whose channel is gone are dropped on the spot; one failing
    /// client never blocks or fails delivery to the rest.
    pub fn broadcast(&self, state: BroadcastState, transition: TransitionConfig) {
        let Some(json) = encode(OverlayMessage::state(state, transition)) else {
            return;
        };
        let mut clients = lock_or_recover(&self.clients, "hub broadcast");
        let before = clients.len();
        clients.retain(|id, sender| {
            let delivered = sender.send(json.clone()).is_ok();
            if !delivered {
                debug!("delivery to {id} failed; dropping client");
            }
            delivered
        });
        debug!(
            clients = clients.len(),
            dropped = before - clients.len(),
            "state broadcast"
        );
    }

    pub fn client_count(&self) -> usize {
        lock_or_recover(&self.clients, "hub client count").len()
    }

    /// Drop every client sender, which ends each connection's writer task.
    pub fn shutdown(&self) {
        lock_or_recover(&self.clients, "hub shutdown").clear();
    }
}

fn encode(message: OverlayMessage) -> Option<String> {
    match serde_json::to_string(&message) {
        Ok(json) => Some(json),
        Err(err) => {
            debug!("wire message serialization failed: {err}");
            None
        }
    }
}
