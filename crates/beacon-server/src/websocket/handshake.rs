//! HTTP upgrade request parsing and handshake responses (RFC 6455 §4.2).

use tokio_tungstenite::tungstenite::handshake::derive_accept_key;

use crate::errors::HandshakeRejection;

/// Headers accepted in one upgrade request.
const MAX_HEADERS: usize = 64;

/// The only WebSocket version spoken.
pub const WEBSOCKET_VERSION: &str = "13";

/// A validated upgrade request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeRequest {
    /// Request target; any path may upgrade.
    pub path: String,
    /// `Sec-WebSocket-Key` as sent.
    pub key: String,
    /// `Host` header, if present.
    pub host: Option<String>,
}

fn header<'b>(headers: &[httparse::Header<'b>], name: &str) -> Option<&'b [u8]> {
    headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value)
}

fn header_str<'b>(headers: &[httparse::Header<'b>], name: &str) -> Option<&'b str> {
    header(headers, name)
        .and_then(|v| std::str::from_utf8(v).ok())
        .map(str::trim)
}

fn has_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

/// Try to parse an upgrade request from the front of `buf`.
///
/// Returns `Ok(None)` while the head is incomplete, or
/// `Ok(Some((request, head_len)))` once it is complete and valid; bytes past
/// `head_len` belong to the WebSocket stream.
pub fn parse_upgrade(
    buf: &[u8],
    max_head: usize,
) -> Result<Option<(UpgradeRequest, usize)>, HandshakeRejection> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut req = httparse::Request::new(&mut headers);

    let head_len = match req.parse(buf) {
        Ok(httparse::Status::Complete(n)) if n > max_head => {
            return Err(HandshakeRejection::HeaderTooLarge { limit: max_head });
        }
        Ok(httparse::Status::Complete(n)) => n,
        Ok(httparse::Status::Partial) if buf.len() >= max_head => {
            return Err(HandshakeRejection::HeaderTooLarge { limit: max_head });
        }
        Ok(httparse::Status::Partial) => return Ok(None),
        Err(httparse::Error::TooManyHeaders) => {
            return Err(HandshakeRejection::HeaderTooLarge { limit: max_head });
        }
        Err(e) => return Err(HandshakeRejection::Malformed(e.to_string())),
    };

    let method = req.method.unwrap_or_default();
    if method != "GET" {
        return Err(HandshakeRejection::MethodNotGet(method.to_string()));
    }
    if req.version != Some(1) {
        return Err(HandshakeRejection::UnsupportedHttpVersion);
    }

    let headers = &*req.headers;
    if !header_str(headers, "upgrade").is_some_and(|v| has_token(v, "websocket")) {
        return Err(HandshakeRejection::MissingUpgrade);
    }
    if !header_str(headers, "connection").is_some_and(|v| has_token(v, "upgrade")) {
        return Err(HandshakeRejection::MissingConnectionUpgrade);
    }
    let key = header_str(headers, "sec-websocket-key")
        .filter(|k| !k.is_empty())
        .ok_or(HandshakeRejection::MissingKey)?;
    match header_str(headers, "sec-websocket-version") {
        Some(WEBSOCKET_VERSION) => {}
        other => {
            return Err(HandshakeRejection::UnsupportedVersion(
                other.map(str::to_string),
            ));
        }
    }

    let request = UpgradeRequest {
        path: req.path.unwrap_or("/").to_string(),
        key: key.to_string(),
        host: header_str(headers, "host").map(str::to_string),
    };
    Ok(Some((request, head_len)))
}

/// `101 Switching Protocols` response for an accepted request.
pub fn accept_response(key: &str) -> String {
    format!(
        "HTTP/1.1 101 Switching Protocols\r\n\
         Upgrade: websocket\r\n\
         Connection: Upgrade\r\n\
         Sec-WebSocket-Accept: {}\r\n\r\n",
        derive_accept_key(key.as_bytes())
    )
}

/// Error response for a refused request. The body is the status line text.
pub fn rejection_response(rejection: &HandshakeRejection) -> String {
    let (code, reason) = rejection.status();
    let body = format!("{code} {reason}");
    let version_header = if matches!(rejection, HandshakeRejection::UnsupportedVersion(_)) {
        "Sec-WebSocket-Version: 13\r\n"
    } else {
        ""
    };
    format!(
        "HTTP/1.1 {code} {reason}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         Content-Length: {}\r\n\
         {version_header}\
         Connection: close\r\n\r\n\
         {body}",
        body.len()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const VALID: &str = "GET /chat HTTP/1.1\r\n\
        Host: example.com\r\n\
        Upgrade: websocket\r\n\
        Connection: Upgrade\r\n\
        Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
        Sec-WebSocket-Version: 13\r\n\r\n";

    fn request_with(upgrade: &str, connection: &str, version: &str) -> String {
        format!(
            "GET / HTTP/1.1\r\nHost: x\r\nUpgrade: {upgrade}\r\nConnection: {connection}\r\n\
             Sec-WebSocket-Key: abc==\r\nSec-WebSocket-Version: {version}\r\n\r\n"
        )
    }

    #[test]
    fn parses_valid_request() {
        let (req, len) = parse_upgrade(VALID.as_bytes(), 8192).unwrap().unwrap();
        assert_eq!(len, VALID.len());
        assert_eq!(req.path, "/chat");
        assert_eq!(req.key, "dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(req.host.as_deref(), Some("example.com"));
    }

    #[test]
    fn trailing_bytes_are_not_part_of_head() {
        let mut raw = VALID.as_bytes().to_vec();
        raw.extend_from_slice(&[0x81, 0x85]);
        let (_, len) = parse_upgrade(&raw, 8192).unwrap().unwrap();
        assert_eq!(len, VALID.len());
    }

    #[test]
    fn partial_head_needs_more() {
        let partial = &VALID.as_bytes()[..30];
        assert_eq!(parse_upgrade(partial, 8192).unwrap(), None);
    }

    #[test]
    fn header_values_case_insensitive() {
        let raw = request_with("WebSocket", "keep-alive, UPGRADE", "13");
        assert!(parse_upgrade(raw.as_bytes(), 8192).unwrap().is_some());
    }

    #[test]
    fn missing_upgrade_rejected() {
        let raw = "GET / HTTP/1.1\r\nHost: x\r\n\r\n";
        assert_matches!(
            parse_upgrade(raw.as_bytes(), 8192),
            Err(HandshakeRejection::MissingUpgrade)
        );
    }

    #[test]
    fn wrong_upgrade_rejected() {
        let raw = request_with("h2c", "Upgrade", "13");
        assert_matches!(
            parse_upgrade(raw.as_bytes(), 8192),
            Err(HandshakeRejection::MissingUpgrade)
        );
    }

    #[test]
    fn connection_without_upgrade_token_rejected() {
        let raw = request_with("websocket", "keep-alive", "13");
        assert_matches!(
            parse_upgrade(raw.as_bytes(), 8192),
            Err(HandshakeRejection::MissingConnectionUpgrade)
        );
    }

    #[test]
    fn missing_key_rejected() {
        let raw = "GET / HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\
                   Sec-WebSocket-Version: 13\r\n\r\n";
        assert_matches!(
            parse_upgrade(raw.as_bytes(), 8192),
            Err(HandshakeRejection::MissingKey)
        );
    }

    #[test]
    fn unsupported_version_rejected() {
        let raw = request_with("websocket", "Upgrade", "8");
        assert_matches!(
            parse_upgrade(raw.as_bytes(), 8192),
            Err(HandshakeRejection::UnsupportedVersion(Some(v))) if v == "8"
        );
    }

    #[test]
    fn post_rejected() {
        let raw = "POST / HTTP/1.1\r\nUpgrade: websocket\r\n\r\n";
        assert_matches!(
            parse_upgrade(raw.as_bytes(), 8192),
            Err(HandshakeRejection::MethodNotGet(m)) if m == "POST"
        );
    }

    #[test]
    fn http_1_0_rejected() {
        let raw = VALID.replace("HTTP/1.1", "HTTP/1.0");
        assert_matches!(
            parse_upgrade(raw.as_bytes(), 8192),
            Err(HandshakeRejection::UnsupportedHttpVersion)
        );
    }

    #[test]
    fn garbage_rejected() {
        let raw = b"GET \x01\x02 nonsense\r\n\r\n";
        assert_matches!(
            parse_upgrade(raw, 8192),
            Err(HandshakeRejection::Malformed(_))
        );
    }

    #[test]
    fn oversized_partial_head_rejected() {
        let raw = format!("GET / HTTP/1.1\r\nX-Pad: {}", "a".repeat(200));
        assert_matches!(
            parse_upgrade(raw.as_bytes(), 128),
            Err(HandshakeRejection::HeaderTooLarge { limit: 128 })
        );
    }

    #[test]
    fn oversized_complete_head_rejected() {
        assert_matches!(
            parse_upgrade(VALID.as_bytes(), 64),
            Err(HandshakeRejection::HeaderTooLarge { limit: 64 })
        );
    }

    #[test]
    fn accept_key_matches_rfc_example() {
        let resp = accept_response("dGhlIHNhbXBsZSBub25jZQ==");
        assert!(resp.starts_with("HTTP/1.1 101 Switching Protocols\r\n"));
        assert!(resp.contains("Sec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n"));
        assert!(resp.ends_with("\r\n\r\n"));
    }

    #[test]
    fn bad_request_response() {
        let resp = rejection_response(&HandshakeRejection::MissingUpgrade);
        assert!(resp.starts_with("HTTP/1.1 400 Bad Request\r\n"));
        assert!(resp.contains("Connection: close\r\n"));
        assert!(resp.contains("Content-Length: 15\r\n"));
        assert!(resp.ends_with("\r\n\r\n400 Bad Request"));
        assert!(!resp.contains("Sec-WebSocket-Version"));
    }

    #[test]
    fn upgrade_required_response_advertises_version() {
        let resp = rejection_response(&HandshakeRejection::UnsupportedVersion(None));
        assert!(resp.starts_with("HTTP/1.1 426 Upgrade Required\r\n"));
        assert!(resp.contains("Sec-WebSocket-Version: 13\r\n"));
    }
}
