//! Binary protocol frames.
//!
//! Wire layout, all fields big-endian:
//!
//! ```text
//! +--------+---------+-------------+--------+---------+-------------+------------+
//! | marker | version | device_type |  mode  | serial  | body length |    body    |
//! |   2    |    2    |      2      |   2    |    4    |      4      | length     |
//! +--------+---------+-------------+--------+---------+-------------+------------+
//! ```
//!
//! [`try_decode`] is the raw incremental decoder: it never bounds the body
//! length. [`FrameCodec`] wraps it as a `tokio_util` codec and applies an
//! optional maximum, failing as soon as an oversized header is seen.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

/// Size of the fixed frame header in bytes.
pub const FRAME_HEADER_LEN: usize = 16;

/// Offset of the 4-byte body length field within the header.
const LENGTH_FIELD_OFFSET: usize = 12;

/// Errors produced while encoding or decoding frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The header announced a frame larger than the configured maximum.
    #[error("frame of {length} bytes exceeds maximum of {max} bytes")]
    TooLarge {
        /// Total announced frame length (header + body).
        length: usize,
        /// Configured maximum.
        max: usize,
    },
    /// A body does not fit the 32-bit length field.
    #[error("frame body of {length} bytes does not fit a u32 length field")]
    BodyTooLong {
        /// Body length that was rejected.
        length: usize,
    },
    /// Transport failure surfaced through the codec.
    #[error("frame transport error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fixed header fields, excluding the body length (derived from the body).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct FrameHeader {
    /// Protocol marker.
    pub marker: u16,
    /// Protocol version.
    pub version: u16,
    /// Device type of the sender.
    pub device_type: u16,
    /// Application-defined mode.
    pub mode: u16,
    /// Sender-assigned serial number.
    pub serial: u32,
}

/// One complete application-level message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Header fields as received.
    pub header: FrameHeader,
    /// Raw body bytes.
    pub body: Bytes,
}

impl Frame {
    /// Create a frame from a header and body.
    pub fn new(header: FrameHeader, body: impl Into<Bytes>) -> Self {
        Self {
            header,
            body: body.into(),
        }
    }

    /// Number of body bytes.
    pub fn body_len(&self) -> usize {
        self.body.len()
    }

    /// Number of bytes this frame occupies on the wire.
    pub fn wire_len(&self) -> usize {
        FRAME_HEADER_LEN + self.body.len()
    }

    /// Append the wire representation of this frame to `dst`.
    pub fn encode(&self, dst: &mut BytesMut) -> Result<(), FrameError> {
        let length = u32::try_from(self.body.len()).map_err(|_| FrameError::BodyTooLong {
            length: self.body.len(),
        })?;
        dst.reserve(self.wire_len());
        dst.put_u16(self.header.marker);
        dst.put_u16(self.header.version);
        dst.put_u16(self.header.device_type);
        dst.put_u16(self.header.mode);
        dst.put_u32(self.header.serial);
        dst.put_u32(length);
        dst.extend_from_slice(&self.body);
        Ok(())
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self) -> Result<Bytes, FrameError> {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        self.encode(&mut buf)?;
        Ok(buf.freeze())
    }
}

/// Read the announced body length without consuming anything.
fn peek_body_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < FRAME_HEADER_LEN {
        return None;
    }
    let at = LENGTH_FIELD_OFFSET;
    let length = u32::from_be_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]]);
    Some(length as usize)
}

/// Header plus body, or `None` if that does not fit in `usize`.
fn frame_total_len(body_len: usize) -> Option<usize> {
    FRAME_HEADER_LEN.checked_add(body_len)
}

/// Try to take one complete frame off the front of `buf`.
///
/// Returns `None` ("need more data") while fewer than 16 header bytes, or
/// fewer than `16 + length` bytes, are buffered; the buffer is left untouched
/// in that case. Otherwise exactly one frame's bytes are consumed and any
/// trailing bytes stay in `buf` for the next call.
pub fn try_decode(buf: &mut BytesMut) -> Option<Frame> {
    // An unaddressable length can never be fully buffered.
    let total = frame_total_len(peek_body_len(buf)?)?;
    if buf.len() < total {
        return None;
    }

    let mut raw = buf.split_to(total);
    let header = FrameHeader {
        marker: raw.get_u16(),
        version: raw.get_u16(),
        device_type: raw.get_u16(),
        mode: raw.get_u16(),
        serial: raw.get_u32(),
    };
    let _length = raw.get_u32();
    Some(Frame {
        header,
        body: raw.freeze(),
    })
}

/// Streaming codec for binary frames.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameCodec {
    max_frame_length: Option<usize>,
}

impl FrameCodec {
    /// Codec without a size limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Codec rejecting frames whose total length (header + body) exceeds `max`.
    pub fn with_max_frame_length(max: usize) -> Self {
        Self {
            max_frame_length: Some(max),
        }
    }

    /// Configured maximum, if any.
    pub fn max_frame_length(&self) -> Option<usize> {
        self.max_frame_length
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        let Some(body_len) = peek_body_len(src) else {
            return Ok(None);
        };
        let Some(total) = frame_total_len(body_len) else {
            return Err(FrameError::TooLarge {
                length: usize::MAX,
                max: self.max_frame_length.unwrap_or(usize::MAX),
            });
        };
        if let Some(max) = self.max_frame_length.filter(|max| total > *max) {
            return Err(FrameError::TooLarge { length: total, max });
        }
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        Ok(try_decode(src))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), FrameError> {
        frame.encode(dst)
    }
}
