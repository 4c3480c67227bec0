//! Server configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the Beacon server.
///
/// The server never loads this itself; callers build it (the daemon maps
/// it from `beacon-settings`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"0.0.0.0"`).
    pub host: String,
    /// Port to bind, shared by both protocols (`0` picks a free port).
    pub port: u16,
    /// Pending-connection backlog.
    pub backlog: u32,
    /// `SO_RCVBUF` for the listening socket, inherited by accepted streams.
    pub recv_buffer_size: Option<u32>,
    /// `SO_SNDBUF` for the listening socket, inherited by accepted streams.
    pub send_buffer_size: Option<u32>,
    /// Disconnect a peer after this long without inbound traffic.
    pub idle_timeout_ms: u64,
    /// Period of the shared idle sweep.
    pub sweep_interval_ms: u64,
    /// Largest binary frame (header + body) accepted from a peer.
    pub max_frame_length: usize,
    /// Largest HTTP upgrade request head accepted.
    pub max_handshake_bytes: usize,
    /// Per-connection outbound queue depth.
    pub outbound_queue: usize,
    /// Initial capacity of pooled read buffers.
    pub read_buffer_capacity: usize,
    /// Bounded wait for connection tasks during graceful shutdown.
    pub shutdown_timeout_ms: u64,
}

impl ServerConfig {
    /// Idle window as a [`Duration`].
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// Sweep period as a [`Duration`], never zero.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    /// Shutdown drain timeout as a [`Duration`].
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    /// `host:port` string suitable for address resolution.
    pub fn bind_address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8888,
            backlog: 64,
            recv_buffer_size: Some(1024 * 1024 * 1024),
            send_buffer_size: Some(1024 * 1024 * 1024),
            idle_timeout_ms: 60_000,
            sweep_interval_ms: 1_000,
            max_frame_length: 16 * 1024 * 1024, // 16 MB
            max_handshake_bytes: 8 * 1024,
            outbound_queue: 1024,
            read_buffer_capacity: 8 * 1024,
            shutdown_timeout_ms: 30_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "0.0.0.0");
        assert_eq!(cfg.port, 8888);
        assert_eq!(cfg.backlog, 64);
        assert_eq!(cfg.recv_buffer_size, Some(1 << 30));
        assert_eq!(cfg.idle_timeout(), Duration::from_secs(60));
        assert_eq!(cfg.sweep_interval(), Duration::from_secs(1));
        assert_eq!(cfg.shutdown_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn zero_sweep_interval_is_clamped() {
        let cfg = ServerConfig {
            sweep_interval_ms: 0,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.sweep_interval(), Duration::from_millis(1));
    }

    #[test]
    fn bind_address_ipv4() {
        let cfg = ServerConfig {
            host: "127.0.0.1".into(),
            port: 9000,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.bind_address(), "127.0.0.1:9000");
    }

    #[test]
    fn bind_address_ipv6_is_bracketed() {
        let cfg = ServerConfig {
            host: "::1".into(),
            port: 9000,
            ..ServerConfig::default()
        };
        assert_eq!(cfg.bind_address(), "[::1]:9000");
    }

    #[test]
    fn serde_roundtrip() {
        let cfg = ServerConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: ServerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.host, cfg.host);
        assert_eq!(back.port, cfg.port);
        assert_eq!(back.idle_timeout_ms, cfg.idle_timeout_ms);
        assert_eq!(back.max_frame_length, cfg.max_frame_length);
    }
}
