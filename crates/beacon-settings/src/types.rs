//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so partial
//! JSON is accepted and missing fields keep their compiled default.

use beacon_logging::{LogFormat, LogLevel};
use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 8888, "idleTimeoutMs": 30000 },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BeaconSettings {
    /// Listener and connection settings.
    pub server: ServerSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

/// Listener and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listening port for both protocols.
    pub port: u16,
    /// Pending-connection backlog.
    pub backlog: u32,
    /// `SO_RCVBUF` in bytes.
    pub recv_buffer_size: u32,
    /// `SO_SNDBUF` in bytes.
    pub send_buffer_size: u32,
    /// Disconnect after this long without inbound traffic.
    pub idle_timeout_ms: u64,
    /// How often the idle sweep runs.
    pub sweep_interval_ms: u64,
    /// Largest accepted binary frame (header + body) in bytes.
    pub max_frame_length: usize,
    /// Largest accepted HTTP upgrade request head in bytes.
    pub max_handshake_bytes: usize,
    /// Per-connection outbound queue depth.
    pub outbound_queue: usize,
    /// Bounded wait for connections to drain on shutdown.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8888,
            backlog: 64,
            recv_buffer_size: 1024 * 1024 * 1024,
            send_buffer_size: 1024 * 1024 * 1024,
            idle_timeout_ms: 60_000,
            sweep_interval_ms: 1_000,
            max_frame_length: 16 * 1024 * 1024,
            max_handshake_bytes: 8 * 1024,
            outbound_queue: 1024,
            shutdown_timeout_ms: 30_000,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Minimum level written to stderr.
    pub level: LogLevel,
    /// Output format.
    pub format: LogFormat,
}
