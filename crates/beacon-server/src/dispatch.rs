//! Protocol detection and the per-connection pipeline.
//!
//! Every accepted socket runs [`serve_connection`]: arm the idle monitor,
//! sniff the first bytes, run the WebSocket or binary session, then tear
//! down exactly once.

use std::net::SocketAddr;
use std::sync::Arc;

use beacon_core::{ConnectionId, ProtocolMode};
use bytes::BytesMut;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{Instrument, debug, info, info_span};

use crate::binary::run_binary;
use crate::connection::{ClientConnection, CloseHandle, CloseReason, Outbound};
use crate::errors::SessionError;
use crate::server::AppState;
use crate::websocket::session::run_websocket;

/// Request-line prefixes that route a connection to the HTTP path.
const HTTP_METHODS: &[&[u8]] = &[
    b"GET ",
    b"POST ",
    b"PUT ",
    b"HEAD ",
    b"DELETE ",
    b"OPTIONS ",
    b"PATCH ",
    b"CONNECT ",
    b"TRACE ",
];

/// Result of inspecting the first bytes of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Sniff {
    /// The prefix could still become an HTTP request line.
    NeedMoreData,
    /// Starts with `<METHOD> ` for a known HTTP method.
    Http,
    /// Cannot be HTTP; treat as binary frames.
    Binary,
}

/// Classify a connection by its buffered prefix.
pub fn sniff(buf: &[u8]) -> Sniff {
    if buf.is_empty() {
        return Sniff::NeedMoreData;
    }
    let mut could_match = false;
    for method in HTTP_METHODS {
        if buf.starts_with(method) {
            return Sniff::Http;
        }
        if method.starts_with(buf) {
            could_match = true;
        }
    }
    if could_match {
        Sniff::NeedMoreData
    } else {
        Sniff::Binary
    }
}

/// State owned by one connection's task.
pub(crate) struct ConnectionUnit {
    pub(crate) id: ConnectionId,
    pub(crate) peer: SocketAddr,
    pub(crate) state: Arc<AppState>,
    pub(crate) closer: CloseHandle,
    mode: ProtocolMode,
    opened: bool,
}

impl ConnectionUnit {
    fn new(id: ConnectionId, peer: SocketAddr, state: Arc<AppState>) -> Self {
        let closer = CloseHandle::new(state.shutdown.child_token());
        Self {
            id,
            peer,
            state,
            closer,
            mode: ProtocolMode::Undetermined,
            opened: false,
        }
    }

    /// Record inbound activity.
    pub(crate) fn touch(&self) {
        self.state.idle.touch(&self.id);
    }

    /// Fix the protocol mode, register with the registry and notify the
    /// observer. Called once a session has a writer to hand out.
    pub(crate) fn open(
        &mut self,
        mode: ProtocolMode,
        tx: mpsc::Sender<Outbound>,
    ) -> Result<Arc<ClientConnection>, SessionError> {
        self.mode = self.mode.transition(mode)?;
        let connection = Arc::new(ClientConnection::new(
            self.id.clone(),
            self.peer,
            mode,
            tx,
            self.closer.clone(),
        ));
        self.state.registry.register(Arc::clone(&connection))?;
        self.opened = true;
        self.state.observer.on_connection_opened(&self.id, mode);
        debug!(%mode, "connection registered");
        Ok(connection)
    }

    /// Reason this unit ended, given how its session returned.
    fn close_reason(&self, result: &Result<(), SessionError>) -> CloseReason {
        match (result, self.closer.reason()) {
            (Err(e), _) => e.close_reason(),
            (Ok(()), Some(reason)) => reason,
            (Ok(()), None) => CloseReason::PeerClosed,
        }
    }
}

/// Read until the prefix decides the protocol. `None` means the peer left
/// or the unit was closed first.
async fn sniff_protocol(
    stream: &mut TcpStream,
    buf: &mut BytesMut,
    unit: &ConnectionUnit,
) -> Result<Option<Sniff>, SessionError> {
    loop {
        match sniff(buf) {
            Sniff::NeedMoreData => {}
            decided => return Ok(Some(decided)),
        }
        let n = tokio::select! {
            n = stream.read_buf(buf) => n?,
            () = unit.closer.cancelled() => return Ok(None),
        };
        if n == 0 {
            return Ok(None);
        }
        unit.touch();
    }
}

/// Serve one accepted socket to completion.
pub(crate) async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    id: ConnectionId,
    state: Arc<AppState>,
) {
    let span = info_span!("connection", connection_id = %id, %peer);
    async move {
        let mut unit = ConnectionUnit::new(id, peer, state);
        unit.state.idle.arm(unit.id.clone(), unit.closer.clone());
        let mut buf = unit.state.pool.acquire();
        debug!("connection accepted");

        let result = match sniff_protocol(&mut stream, &mut buf, &unit).await {
            Ok(Some(Sniff::Http)) => run_websocket(stream, &mut buf, &mut unit).await,
            Ok(Some(_)) => run_binary(stream, &mut buf, &mut unit).await,
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        };

        // Single teardown path.
        let reason = unit.close_reason(&result);
        let _ = unit.state.registry.unregister(&unit.id);
        let _ = unit.state.idle.disarm(&unit.id);
        unit.closer.release();
        unit.state.pool.release(buf);

        if let Err(e) = &result {
            debug!(error = %e, "session ended with error");
        }
        if unit.opened {
            unit.state.observer.on_connection_closed(&unit.id, reason);
            info!(mode = %unit.mode, %reason, "connection closed");
        } else {
            debug!(%reason, "connection closed before protocol was established");
        }
    }
    .instrument(span)
    .await;
}
