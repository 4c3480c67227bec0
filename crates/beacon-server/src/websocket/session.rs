//! WebSocket session lifecycle: handles a single client from the upgrade
//! request through disconnect.

use std::sync::Arc;
use std::time::Duration;

use beacon_core::{ProtocolMode, format_envelope};
use bytes::{Buf, BytesMut};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};
use tracing::{Instrument, debug, info};

use super::handshake::{accept_response, parse_upgrade, rejection_response};
use crate::connection::{CloseHandle, Outbound};
use crate::dispatch::ConnectionUnit;
use crate::errors::{HandshakeRejection, SessionError};

/// How long teardown waits for the writer to flush its final frames.
const WRITER_GRACE: Duration = Duration::from_secs(1);

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

fn close_frame(code: CloseCode, reason: &str) -> CloseFrame {
    CloseFrame {
        code,
        reason: reason.to_owned().into(),
    }
}

/// Run a WebSocket session on a stream whose first bytes (already in `buf`)
/// look like an HTTP request.
///
/// 1. Reads and validates the upgrade request, answering 101 or a 4xx
/// 2. Registers the connection and spawns its writer task
/// 3. Broadcasts text frames, answers pings, rejects binary frames
/// 4. Closes the writer and waits briefly for it to flush
pub(crate) async fn run_websocket(
    mut stream: TcpStream,
    buf: &mut BytesMut,
    unit: &mut ConnectionUnit,
) -> Result<(), SessionError> {
    let max_head = unit.state.config.max_handshake_bytes;
    let request = loop {
        match parse_upgrade(buf, max_head) {
            Ok(Some((request, head_len))) => {
                buf.advance(head_len);
                break request;
            }
            Ok(None) => {}
            Err(rejection) => {
                reject(&mut stream, &rejection).await;
                return Err(rejection.into());
            }
        }
        let n = tokio::select! {
            n = stream.read_buf(buf) => n?,
            () = unit.closer.cancelled() => return Ok(()),
        };
        if n == 0 {
            debug!("peer closed during handshake");
            return Ok(());
        }
        unit.touch();
    };

    stream
        .write_all(accept_response(&request.key).as_bytes())
        .await?;
    debug!(path = %request.path, host = ?request.host, "websocket upgrade accepted");

    // Bytes after the request head already belong to the WebSocket stream.
    let leftover = buf.to_vec();
    buf.clear();
    let ws = WebSocketStream::from_partially_read(stream, leftover, Role::Server, None).await;

    let (tx, rx) = mpsc::channel(unit.state.config.outbound_queue);
    let connection = unit.open(ProtocolMode::WebSocket, tx.clone())?;
    let (sink, mut source) = ws.split();
    let mut writer = tokio::spawn(write_loop(sink, rx, unit.closer.clone()).in_current_span());

    let result = loop {
        let next = tokio::select! {
            next = source.next() => next,
            () = unit.closer.cancelled() => break Ok(()),
        };
        let message = match next {
            None => break Ok(()),
            Some(Ok(message)) => message,
            Some(Err(e)) => break Err(SessionError::from(e)),
        };
        unit.touch();

        match message {
            Message::Text(text) => {
                let envelope: Arc<str> =
                    format_envelope(chrono::Utc::now(), &unit.id, text.as_str()).into();
                let report = unit.state.registry.broadcast(&envelope);
                debug!(recipients = report.recipients(), "text message broadcast");
            }
            Message::Binary(data) => {
                debug!(len = data.len(), "rejecting binary websocket frame");
                break Err(SessionError::UnsupportedData);
            }
            // The protocol layer has queued the echoing pong; push it out.
            Message::Ping(_) => connection.request_flush(),
            Message::Pong(_) | Message::Frame(_) => {}
            Message::Close(frame) => {
                debug!(?frame, "peer sent close frame");
                break Ok(());
            }
        }
    };

    if !unit.closer.is_closed() {
        let farewell = matches!(result, Err(SessionError::UnsupportedData))
            .then(|| close_frame(CloseCode::Unsupported, "binary frames are not supported"));
        let _ = tokio::time::timeout(WRITER_GRACE, tx.send(Outbound::Close(farewell))).await;
    }
    drop(tx);
    if tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
        debug!("websocket writer did not finish in time, aborting");
        writer.abort();
    }
    result
}

async fn reject(stream: &mut TcpStream, rejection: &HandshakeRejection) {
    let (status, _) = rejection.status();
    info!(status, %rejection, "rejecting upgrade request");
    if let Err(e) = stream
        .write_all(rejection_response(rejection).as_bytes())
        .await
    {
        debug!(error = %e, "failed to write rejection response");
    }
    let _ = stream.shutdown().await;
}

/// Forward queued messages to the socket until told to close.
async fn write_loop(mut sink: WsSink, mut rx: mpsc::Receiver<Outbound>, closer: CloseHandle) {
    loop {
        tokio::select! {
            biased;
            () = closer.cancelled() => {
                drain_queued(&mut sink, &mut rx).await;
                let farewell = close_frame(CloseCode::Away, "server closing connection");
                if let Err(e) = sink.send(Message::Close(Some(farewell))).await {
                    debug!(error = %e, "failed to send close frame");
                }
                break;
            }
            msg = rx.recv() => match msg {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sink.send(Message::Text(text.to_string().into())).await {
                        debug!(error = %e, "websocket write failed");
                        let _ = closer.close(SessionError::from(e).close_reason());
                        break;
                    }
                }
                Some(Outbound::Flush) => {
                    if let Err(e) = sink.flush().await {
                        debug!(error = %e, "websocket flush failed");
                        let _ = closer.close(SessionError::from(e).close_reason());
                        break;
                    }
                }
                Some(Outbound::Close(frame)) => {
                    if let Some(frame) = frame {
                        let _ = sink.send(Message::Close(Some(frame))).await;
                    }
                    break;
                }
                None => break,
            },
        }
    }
    // Completes (or acknowledges) the closing handshake and flushes.
    let _ = sink.close().await;
}

/// Write out text already queued when a close was requested.
async fn drain_queued(sink: &mut WsSink, rx: &mut mpsc::Receiver<Outbound>) {
    while let Ok(outbound) = rx.try_recv() {
        if let Outbound::Text(text) = outbound {
            if sink
                .feed(Message::Text(text.to_string().into()))
                .await
                .is_err()
            {
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::CloseReason;

    // Full session flows are covered in tests/integration.rs.

    #[test]
    fn close_frame_carries_code_and_reason() {
        let frame = close_frame(CloseCode::Unsupported, "binary frames are not supported");
        assert_eq!(frame.code, CloseCode::Unsupported);
        assert_eq!(u16::from(frame.code), 1003);
        assert_eq!(frame.reason.as_str(), "binary frames are not supported");
    }

    #[test]
    fn away_code_is_1001() {
        assert_eq!(u16::from(CloseCode::Away), 1001);
    }

    #[tokio::test]
    async fn failed_write_closes_the_connection() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move { TcpStream::connect(addr).await.unwrap() });
        let (server_side, _) = listener.accept().await.unwrap();
        drop(client.await.unwrap());

        let ws = WebSocketStream::from_raw_socket(server_side, Role::Server, None).await;
        let (sink, _source) = ws.split();
        let (tx, rx) = mpsc::channel(8);
        let closer = CloseHandle::new(tokio_util::sync::CancellationToken::new());
        let task = tokio::spawn(write_loop(sink, rx, closer.clone()));

        let writer_gone = tokio::time::timeout(Duration::from_secs(5), async {
            while tx.send(Outbound::Text("ping".into())).await.is_ok() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(writer_gone.is_ok());
        task.await.unwrap();
        assert_eq!(closer.reason(), Some(CloseReason::TransportError));
    }
}
