//! # beacon-server
//!
//! Single-port connection server speaking two protocols.
//!
//! - Protocol sniffing: HTTP request line → WebSocket upgrade, anything else
//!   → length-prefixed binary frames
//! - `ConnectionRegistry` with non-blocking broadcast to every connection
//! - Shared idle sweep evicting peers without inbound traffic
//! - Graceful shutdown via `CancellationToken` + `TaskTracker`

#![deny(unsafe_code)]

pub mod binary;
pub mod config;
pub mod connection;
pub(crate) mod dispatch;
pub mod errors;
pub mod idle;
pub mod observer;
pub mod pool;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use config::ServerConfig;
pub use connection::{ClientConnection, CloseHandle, CloseReason, Outbound, SendOutcome};
pub use dispatch::{Sniff, sniff};
pub use errors::{HandshakeRejection, RegistryError, ServerError, SessionError};
pub use idle::IdleMonitor;
pub use observer::{ConnectionObserver, NoopObserver, TracingObserver};
pub use pool::BufferPool;
pub use registry::{BroadcastReport, ConnectionRegistry};
pub use server::{AppState, BeaconServer};
pub use shutdown::ShutdownCoordinator;
