//! # beacon-core
//!
//! Foundation types shared by every Beacon crate.
//!
//! - **Connection IDs**: [`ConnectionId`], a UUID v7 newtype assigned at accept time
//! - **Binary frames**: [`Frame`], [`FrameHeader`] and the streaming [`FrameCodec`]
//! - **Protocol modes**: [`ProtocolMode`] with its one-way transition rule
//! - **Broadcast envelope**: [`format_envelope`] for text fan-out

#![deny(unsafe_code)]

pub mod envelope;
pub mod frame;
pub mod ids;
pub mod mode;

pub use envelope::{format_envelope, format_timestamp};
pub use frame::{FRAME_HEADER_LEN, Frame, FrameCodec, FrameError, FrameHeader, try_decode};
pub use ids::ConnectionId;
pub use mode::{ModeError, ProtocolMode};
