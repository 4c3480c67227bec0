//! Protocol mode of a connection.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Which wire protocol a connection speaks.
///
/// Every connection starts out `Undetermined` and moves exactly once to
/// `Binary` or `WebSocket` after the first bytes have been sniffed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProtocolMode {
    /// Nothing has been read yet.
    #[default]
    Undetermined,
    /// Length-prefixed binary frames.
    Binary,
    /// WebSocket after a completed upgrade handshake.
    WebSocket,
}

/// Rejected mode transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid protocol mode transition: {from} -> {to}")]
pub struct ModeError {
    /// Mode the connection was in.
    pub from: ProtocolMode,
    /// Mode that was requested.
    pub to: ProtocolMode,
}

impl ProtocolMode {
    /// Validate a transition from `self` to `next`.
    ///
    /// The only legal moves are `Undetermined -> Binary` and
    /// `Undetermined -> WebSocket`.
    pub fn transition(self, next: Self) -> Result<Self, ModeError> {
        match (self, next) {
            (Self::Undetermined, Self::Binary | Self::WebSocket) => Ok(next),
            (from, to) => Err(ModeError { from, to }),
        }
    }

    /// Stable lowercase name, used in log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Undetermined => "undetermined",
            Self::Binary => "binary",
            Self::WebSocket => "websocket",
        }
    }
}

impl fmt::Display for ProtocolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn default_is_undetermined() {
        assert_eq!(ProtocolMode::default(), ProtocolMode::Undetermined);
    }

    #[test]
    fn undetermined_moves_to_either_protocol() {
        assert_eq!(
            ProtocolMode::Undetermined.transition(ProtocolMode::Binary),
            Ok(ProtocolMode::Binary)
        );
        assert_eq!(
            ProtocolMode::Undetermined.transition(ProtocolMode::WebSocket),
            Ok(ProtocolMode::WebSocket)
        );
    }

    #[test]
    fn no_transition_back_to_undetermined() {
        assert_matches!(
            ProtocolMode::Binary.transition(ProtocolMode::Undetermined),
            Err(ModeError { from: ProtocolMode::Binary, to: ProtocolMode::Undetermined })
        );
        assert!(ProtocolMode::WebSocket.transition(ProtocolMode::Undetermined).is_err());
    }

    #[test]
    fn mode_is_sticky() {
        assert!(ProtocolMode::Binary.transition(ProtocolMode::WebSocket).is_err());
        assert!(ProtocolMode::WebSocket.transition(ProtocolMode::Binary).is_err());
        assert!(ProtocolMode::Binary.transition(ProtocolMode::Binary).is_err());
    }

    #[test]
    fn undetermined_to_undetermined_rejected() {
        assert!(ProtocolMode::Undetermined.transition(ProtocolMode::Undetermined).is_err());
    }

    #[test]
    fn error_message_names_both_modes() {
        let err = ProtocolMode::Binary
            .transition(ProtocolMode::WebSocket)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid protocol mode transition: binary -> websocket"
        );
    }
}
