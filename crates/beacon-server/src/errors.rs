//! Server error types.

use beacon_core::{ConnectionId, FrameError, ModeError};
use thiserror::Error;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::error::ProtocolError;

use crate::connection::CloseReason;

/// Fatal startup errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listening socket could not be set up.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: String,
        /// Underlying socket error.
        source: std::io::Error,
    },
    /// Other I/O failure outside any single connection.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Registry invariant violations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A connection with this identifier is already registered.
    #[error("connection {0} is already registered")]
    DuplicateIdentifier(ConnectionId),
}

/// Why an HTTP upgrade request was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandshakeRejection {
    /// The request head could not be parsed as HTTP.
    #[error("malformed upgrade request: {0}")]
    Malformed(String),
    /// Only `GET` can be upgraded.
    #[error("method {0} cannot be upgraded")]
    MethodNotGet(String),
    /// Only HTTP/1.1 can be upgraded.
    #[error("upgrade requires HTTP/1.1")]
    UnsupportedHttpVersion,
    /// `Upgrade: websocket` is missing.
    #[error("missing `Upgrade: websocket` header")]
    MissingUpgrade,
    /// `Connection` does not carry the `upgrade` token.
    #[error("`Connection` header lacks the upgrade token")]
    MissingConnectionUpgrade,
    /// `Sec-WebSocket-Key` is missing or empty.
    #[error("missing Sec-WebSocket-Key header")]
    MissingKey,
    /// `Sec-WebSocket-Version` is missing or not 13.
    #[error("unsupported websocket version {0:?}")]
    UnsupportedVersion(Option<String>),
    /// The request head grew past the configured limit.
    #[error("request head exceeds {limit} bytes")]
    HeaderTooLarge {
        /// Configured limit in bytes.
        limit: usize,
    },
}

impl HandshakeRejection {
    /// HTTP status code and reason phrase for the rejection response.
    pub fn status(&self) -> (u16, &'static str) {
        match self {
            Self::UnsupportedVersion(_) => (426, "Upgrade Required"),
            Self::HeaderTooLarge { .. } => (431, "Request Header Fields Too Large"),
            _ => (400, "Bad Request"),
        }
    }
}

/// Errors that end a single connection. Never fatal to the server.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Socket read/write failure.
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),
    /// Binary framing failure (oversized frame).
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// WebSocket protocol or transport failure.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    /// The upgrade request was refused.
    #[error("handshake rejected: {0}")]
    Handshake(#[from] HandshakeRejection),
    /// The peer sent a data frame type the server does not accept.
    #[error("unsupported websocket data frame")]
    UnsupportedData,
    /// Protocol mode moved illegally.
    #[error(transparent)]
    Mode(#[from] ModeError),
    /// Registration failed.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl SessionError {
    /// Close reason recorded when this error ends a connection.
    pub fn close_reason(&self) -> CloseReason {
        match self {
            Self::Io(_) | Self::Frame(FrameError::Io(_)) => CloseReason::TransportError,
            Self::WebSocket(
                tungstenite::Error::ConnectionClosed
                | tungstenite::Error::AlreadyClosed
                | tungstenite::Error::Protocol(
                    ProtocolError::ResetWithoutClosingHandshake | ProtocolError::SendAfterClosing,
                ),
            ) => CloseReason::PeerClosed,
            Self::WebSocket(tungstenite::Error::Protocol(_) | tungstenite::Error::Capacity(_)) => {
                CloseReason::ProtocolError
            }
            Self::WebSocket(_) => CloseReason::TransportError,
            Self::Handshake(_) => CloseReason::HandshakeRejected,
            Self::Frame(_) | Self::UnsupportedData | Self::Mode(_) | Self::Registry(_) => {
                CloseReason::ProtocolError
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_error_display() {
        let err = ServerError::Bind {
            addr: "0.0.0.0:8888".into(),
            source: std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use"),
        };
        assert_eq!(err.to_string(), "failed to bind 0.0.0.0:8888: in use");
    }

    #[test]
    fn duplicate_identifier_display() {
        let err = RegistryError::DuplicateIdentifier(ConnectionId::from("conn_1"));
        assert_eq!(err.to_string(), "connection conn_1 is already registered");
    }

    #[test]
    fn rejection_status_codes() {
        assert_eq!(HandshakeRejection::MissingUpgrade.status().0, 400);
        assert_eq!(HandshakeRejection::MissingKey.status().0, 400);
        assert_eq!(
            HandshakeRejection::UnsupportedVersion(Some("8".into())).status(),
            (426, "Upgrade Required")
        );
        assert_eq!(
            HandshakeRejection::HeaderTooLarge { limit: 10 }.status().0,
            431
        );
    }

    #[test]
    fn close_reasons() {
        let io = SessionError::Io(std::io::Error::other("reset"));
        assert_eq!(io.close_reason(), CloseReason::TransportError);

        let large = SessionError::Frame(FrameError::TooLarge { length: 100, max: 10 });
        assert_eq!(large.close_reason(), CloseReason::ProtocolError);

        assert_eq!(
            SessionError::UnsupportedData.close_reason(),
            CloseReason::ProtocolError
        );
        assert_eq!(
            SessionError::Handshake(HandshakeRejection::MissingKey).close_reason(),
            CloseReason::HandshakeRejected
        );
        assert_eq!(
            SessionError::WebSocket(tungstenite::Error::Protocol(
                ProtocolError::ResetWithoutClosingHandshake
            ))
            .close_reason(),
            CloseReason::PeerClosed
        );
        // A write racing the peer's close frame.
        assert_eq!(
            SessionError::WebSocket(tungstenite::Error::Protocol(
                ProtocolError::SendAfterClosing
            ))
            .close_reason(),
            CloseReason::PeerClosed
        );
        assert_eq!(
            SessionError::WebSocket(tungstenite::Error::Protocol(
                ProtocolError::NonZeroReservedBits
            ))
            .close_reason(),
            CloseReason::ProtocolError
        );
    }
}
