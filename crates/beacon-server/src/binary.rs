//! Binary protocol session: decodes length-prefixed frames for the observer
//! and writes broadcast messages back as server frames.

use std::time::Duration;

use beacon_core::{Frame, FrameCodec, FrameHeader, ProtocolMode};
use bytes::BytesMut;
use futures::SinkExt;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::mpsc;
use tokio_util::codec::{Decoder, FramedWrite};
use tracing::{Instrument, debug};

use crate::connection::{CloseHandle, CloseReason, Outbound};
use crate::dispatch::ConnectionUnit;
use crate::errors::SessionError;

/// How long teardown waits for the writer to flush.
const WRITER_GRACE: Duration = Duration::from_secs(1);

/// Protocol version stamped on server frames.
pub const SERVER_FRAME_VERSION: u16 = 1;

/// Wrap a broadcast text in a server frame.
///
/// Header: marker 0, version 1, device type 0, mode 0, `serial` as given.
pub fn server_frame(serial: u32, text: &str) -> Frame {
    let header = FrameHeader {
        marker: 0,
        version: SERVER_FRAME_VERSION,
        device_type: 0,
        mode: 0,
        serial,
    };
    Frame::new(header, text.as_bytes().to_vec())
}

/// Run a binary session. Bytes consumed while sniffing are in `buf` and are
/// decoded before anything else is read.
pub(crate) async fn run_binary(
    stream: TcpStream,
    buf: &mut BytesMut,
    unit: &mut ConnectionUnit,
) -> Result<(), SessionError> {
    let (mut reader, writer) = stream.into_split();
    let (tx, rx) = mpsc::channel(unit.state.config.outbound_queue);
    let _connection = unit.open(ProtocolMode::Binary, tx.clone())?;
    let sink = FramedWrite::new(writer, FrameCodec::new());
    let mut writer = tokio::spawn(write_loop(sink, rx, unit.closer.clone()).in_current_span());

    let mut codec = FrameCodec::with_max_frame_length(unit.state.config.max_frame_length);
    let result = loop {
        if let Err(e) = deliver_frames(&mut codec, buf, unit) {
            break Err(e);
        }
        let n = tokio::select! {
            n = reader.read_buf(buf) => n,
            () = unit.closer.cancelled() => break Ok(()),
        };
        match n {
            Ok(0) => {
                if !buf.is_empty() {
                    debug!(pending = buf.len(), "peer closed mid-frame");
                }
                break Ok(());
            }
            Ok(_) => unit.touch(),
            Err(e) => break Err(e.into()),
        }
    };

    if !unit.closer.is_closed() {
        let _ = tokio::time::timeout(WRITER_GRACE, tx.send(Outbound::Close(None))).await;
    }
    drop(tx);
    if tokio::time::timeout(WRITER_GRACE, &mut writer).await.is_err() {
        debug!("binary writer did not finish in time, aborting");
        writer.abort();
    }
    result
}

/// Hand every complete frame in `buf` to the observer, in order.
fn deliver_frames(
    codec: &mut FrameCodec,
    buf: &mut BytesMut,
    unit: &ConnectionUnit,
) -> Result<(), SessionError> {
    while let Some(frame) = codec.decode(buf)? {
        unit.state.observer.on_binary_frame(&unit.id, &frame);
    }
    Ok(())
}

/// Encode queued broadcasts as server frames until told to close.
async fn write_loop(
    mut sink: FramedWrite<OwnedWriteHalf, FrameCodec>,
    mut rx: mpsc::Receiver<Outbound>,
    closer: CloseHandle,
) {
    let mut serial: u32 = 0;
    loop {
        tokio::select! {
            biased;
            () = closer.cancelled() => {
                while let Ok(outbound) = rx.try_recv() {
                    if let Outbound::Text(text) = outbound {
                        if sink.feed(server_frame(serial, &text)).await.is_err() {
                            break;
                        }
                        serial = serial.wrapping_add(1);
                    }
                }
                break;
            }
            msg = rx.recv() => match msg {
                Some(Outbound::Text(text)) => {
                    if let Err(e) = sink.send(server_frame(serial, &text)).await {
                        debug!(error = %e, "binary write failed");
                        let _ = closer.close(CloseReason::TransportError);
                        break;
                    }
                    serial = serial.wrapping_add(1);
                }
                Some(Outbound::Flush) => {
                    if let Err(e) = sink.flush().await {
                        debug!(error = %e, "binary flush failed");
                        let _ = closer.close(CloseReason::TransportError);
                        break;
                    }
                }
                Some(Outbound::Close(_)) | None => break,
            },
        }
    }
    // Flushes pending frames and shuts down the write half.
    let _ = sink.close().await;
}
