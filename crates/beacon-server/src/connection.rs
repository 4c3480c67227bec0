//! Client connection state.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use beacon_core::{ConnectionId, ProtocolMode};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_util::sync::CancellationToken;

/// Why a connection ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseReason {
    /// The peer closed the stream or sent a close frame.
    PeerClosed,
    /// No inbound traffic within the idle window.
    IdleTimeout,
    /// The server is shutting down.
    Shutdown,
    /// The outbound queue was found closed during broadcast.
    DeliveryFailed,
    /// Oversized frame, unsupported opcode, or another protocol violation.
    ProtocolError,
    /// Socket-level failure.
    TransportError,
    /// The HTTP upgrade request was refused.
    HandshakeRejected,
}

impl CloseReason {
    /// Stable snake-case name, used in log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PeerClosed => "peer_closed",
            Self::IdleTimeout => "idle_timeout",
            Self::Shutdown => "shutdown",
            Self::DeliveryFailed => "delivery_failed",
            Self::ProtocolError => "protocol_error",
            Self::TransportError => "transport_error",
            Self::HandshakeRejected => "handshake_rejected",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cancellation handle for one connection unit.
///
/// The first [`close`](Self::close) wins and records its reason. A token
/// cancelled by its parent (server shutdown) reports [`CloseReason::Shutdown`].
#[derive(Clone, Debug)]
pub struct CloseHandle {
    token: CancellationToken,
    reason: Arc<Mutex<Option<CloseReason>>>,
}

impl CloseHandle {
    /// Wrap a cancellation token, usually a child of the server token.
    pub fn new(token: CancellationToken) -> Self {
        Self {
            token,
            reason: Arc::new(Mutex::new(None)),
        }
    }

    /// Ask the connection to close. Returns `false` if it was already closing.
    pub fn close(&self, reason: CloseReason) -> bool {
        {
            let mut slot = self.reason.lock();
            if slot.is_some() || self.token.is_cancelled() {
                return false;
            }
            *slot = Some(reason);
        }
        self.token.cancel();
        true
    }

    /// Whether a close has been requested.
    pub fn is_closed(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Recorded close reason, if any.
    pub fn reason(&self) -> Option<CloseReason> {
        if let Some(reason) = *self.reason.lock() {
            return Some(reason);
        }
        self.token.is_cancelled().then_some(CloseReason::Shutdown)
    }

    /// Resolves once a close has been requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }

    /// Cancel without recording a reason; used on teardown so helper tasks stop.
    pub(crate) fn release(&self) {
        self.token.cancel();
    }
}

/// Work item for a connection's writer task.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A broadcast envelope.
    Text(Arc<str>),
    /// Flush frames queued by the protocol layer (e.g. automatic pongs).
    Flush,
    /// Send an optional close frame, flush, and stop writing.
    Close(Option<CloseFrame>),
}

/// Result of a non-blocking enqueue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Accepted by the outbound queue.
    Queued,
    /// Queue is full; the message was dropped.
    Full,
    /// Writer is gone; the connection is closing.
    Closed,
}

/// A registered connection, shared between its own task and the registry.
pub struct ClientConnection {
    /// Unique connection ID assigned at accept time.
    pub id: ConnectionId,
    /// Remote address.
    pub peer: SocketAddr,
    /// Protocol chosen after sniffing; fixed for the connection's lifetime.
    pub mode: ProtocolMode,
    /// Send channel to the connection's writer task.
    tx: mpsc::Sender<Outbound>,
    /// When the socket was accepted.
    pub connected_at: Instant,
    closer: CloseHandle,
    /// Count of messages dropped due to a full queue.
    pub dropped_messages: AtomicU64,
}

impl ClientConnection {
    /// Create a new connection.
    pub fn new(
        id: ConnectionId,
        peer: SocketAddr,
        mode: ProtocolMode,
        tx: mpsc::Sender<Outbound>,
        closer: CloseHandle,
    ) -> Self {
        Self {
            id,
            peer,
            mode,
            tx,
            connected_at: Instant::now(),
            closer,
            dropped_messages: AtomicU64::new(0),
        }
    }

    /// Enqueue a text message without waiting.
    ///
    /// A full queue drops the message and increments the dropped counter.
    pub fn send(&self, message: Arc<str>) -> SendOutcome {
        match self.tx.try_send(Outbound::Text(message)) {
            Ok(()) => SendOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Full
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Ask the writer to flush protocol-level replies. Best-effort.
    pub fn request_flush(&self) {
        let _ = self.tx.try_send(Outbound::Flush);
    }

    /// Request the connection to close.
    pub fn close(&self, reason: CloseReason) -> bool {
        self.closer.close(reason)
    }

    /// The connection's close handle.
    pub fn closer(&self) -> &CloseHandle {
        &self.closer
    }

    /// Total messages dropped for this connection.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("mode", &self.mode)
            .field("dropped_messages", &self.drop_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) fn test_connection(
    id: &str,
    capacity: usize,
) -> (Arc<ClientConnection>, mpsc::Receiver<Outbound>) {
    let (tx, rx) = mpsc::channel(capacity);
    let conn = ClientConnection::new(
        ConnectionId::from(id),
        SocketAddr::from(([127, 0, 0, 1], 4000)),
        ProtocolMode::WebSocket,
        tx,
        CloseHandle::new(CancellationToken::new()),
    );
    (Arc::new(conn), rx)
}
