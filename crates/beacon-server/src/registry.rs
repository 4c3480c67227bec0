//! Registry of open connections and broadcast fan-out.

use std::collections::HashMap;
use std::sync::Arc;

use beacon_core::ConnectionId;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::connection::{ClientConnection, CloseReason, SendOutcome};
use crate::errors::RegistryError;

/// Outcome of one broadcast.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections whose queue accepted the message.
    pub delivered: usize,
    /// Connections whose queue was full; the message was dropped for them.
    pub dropped: usize,
    /// Connections found closed and removed.
    pub evicted: usize,
}

impl BroadcastReport {
    /// Number of connections the broadcast was attempted on.
    pub fn recipients(&self) -> usize {
        self.delivered + self.dropped + self.evicted
    }
}

/// All registered connections, indexed by ID.
///
/// Mutations are serialized by one mutex. [`broadcast`](Self::broadcast)
/// snapshots under the lock and enqueues outside it.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: Mutex<HashMap<ConnectionId, Arc<ClientConnection>>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. Fails if its ID is already present.
    pub fn register(&self, connection: Arc<ClientConnection>) -> Result<(), RegistryError> {
        let mut conns = self.connections.lock();
        if conns.contains_key(&connection.id) {
            return Err(RegistryError::DuplicateIdentifier(connection.id.clone()));
        }
        let _ = conns.insert(connection.id.clone(), connection);
        Ok(())
    }

    /// Remove a connection by ID. A second removal is a no-op.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.lock().remove(id)
    }

    /// Look up a connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.lock().get(id).cloned()
    }

    /// Number of registered connections.
    pub fn size(&self) -> usize {
        self.connections.lock().len()
    }

    /// Whether no connections are registered.
    pub fn is_empty(&self) -> bool {
        self.connections.lock().is_empty()
    }

    /// Snapshot of registered IDs.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.connections.lock().keys().cloned().collect()
    }

    fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.connections.lock().values().cloned().collect()
    }

    /// Deliver `message` to every registered connection's outbound queue.
    ///
    /// Never waits on a peer. A full queue drops the message for that peer
    /// only; a closed queue evicts the connection and asks its unit to close.
    pub fn broadcast(&self, message: &Arc<str>) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for conn in self.snapshot() {
            match conn.send(Arc::clone(message)) {
                SendOutcome::Queued => report.delivered += 1,
                SendOutcome::Full => {
                    report.dropped += 1;
                    warn!(
                        connection_id = %conn.id,
                        dropped_total = conn.drop_count(),
                        "outbound queue full, dropping broadcast message"
                    );
                }
                SendOutcome::Closed => {
                    report.evicted += 1;
                    let _ = self.unregister(&conn.id);
                    let _ = conn.close(CloseReason::DeliveryFailed);
                    debug!(connection_id = %conn.id, "evicted connection with closed queue");
                }
            }
        }
        debug!(
            delivered = report.delivered,
            dropped = report.dropped,
            evicted = report.evicted,
            "broadcast message"
        );
        report
    }

    /// Ask every registered connection to close. Returns how many were asked.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        let conns = self.snapshot();
        for conn in &conns {
            let _ = conn.close(reason);
        }
        conns.len()
    }
}
