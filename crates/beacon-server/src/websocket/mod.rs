//! WebSocket protocol path: upgrade handshake and frame handling.

pub mod handshake;
pub(crate) mod session;

pub use handshake::{UpgradeRequest, accept_response, parse_upgrade, rejection_response};
