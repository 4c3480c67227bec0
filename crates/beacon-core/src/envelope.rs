//! Broadcast envelope for WebSocket text messages.
//!
//! Every text message a peer sends is re-broadcast as
//! `<timestamp> <connection-id> : <text>`, where the timestamp is UTC RFC 3339
//! with millisecond precision, e.g.
//! `2026-01-01T00:00:00.000Z 0192f0c2-6c1e-7a41-9f7a-5b1f0e9c1d22 : hello`.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::ids::ConnectionId;

/// Render a timestamp the way envelopes carry it.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Build the broadcast text for a message received from `sender`.
pub fn format_envelope(at: DateTime<Utc>, sender: &ConnectionId, text: &str) -> String {
    format!("{} {sender} : {text}", format_timestamp(at))
}
