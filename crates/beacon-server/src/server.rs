//! `BeaconServer`: listening socket, accept loop, and shared state.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use beacon_core::ConnectionId;
use tokio::net::{TcpListener, TcpSocket};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::connection::CloseReason;
use crate::dispatch::serve_connection;
use crate::errors::ServerError;
use crate::idle::IdleMonitor;
use crate::observer::{ConnectionObserver, NoopObserver};
use crate::pool::BufferPool;
use crate::registry::ConnectionRegistry;
use crate::shutdown::ShutdownCoordinator;

/// Back-off after a failed `accept`.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Idle read buffers kept for reuse.
const POOLED_BUFFERS: usize = 256;

/// State shared by the accept loop, the idle sweep, and connection tasks.
pub struct AppState {
    /// Server configuration.
    pub config: ServerConfig,
    /// Registered connections.
    pub registry: ConnectionRegistry,
    /// Idle-timeout watchdog.
    pub idle: Arc<IdleMonitor>,
    /// Read buffer pool.
    pub pool: BufferPool,
    /// Lifecycle and frame callbacks.
    pub observer: Arc<dyn ConnectionObserver>,
    /// Shutdown coordinator.
    pub shutdown: ShutdownCoordinator,
    /// When the server was created.
    pub start_time: Instant,
}

/// The Beacon connection server.
pub struct BeaconServer {
    state: Arc<AppState>,
}

impl BeaconServer {
    /// Create a server with no observer.
    pub fn new(config: ServerConfig) -> Self {
        Self::with_observer(config, Arc::new(NoopObserver))
    }

    /// Create a server reporting to `observer`.
    pub fn with_observer(config: ServerConfig, observer: Arc<dyn ConnectionObserver>) -> Self {
        let state = AppState {
            registry: ConnectionRegistry::new(),
            idle: Arc::new(IdleMonitor::new(config.idle_timeout())),
            pool: BufferPool::new(config.read_buffer_capacity, POOLED_BUFFERS),
            observer,
            shutdown: ShutdownCoordinator::new(),
            start_time: Instant::now(),
            config,
        };
        Self {
            state: Arc::new(state),
        }
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Get the connection registry.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.state.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown_coordinator(&self) -> &ShutdownCoordinator {
        &self.state.shutdown
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.state.registry.size()
    }

    /// Time since the server was created.
    pub fn uptime(&self) -> Duration {
        self.state.start_time.elapsed()
    }

    /// Bind the listening socket and start accepting.
    ///
    /// Returns the bound address and the accept loop's handle. The loop
    /// exits, releasing the socket, when [`shutdown`](Self::shutdown) runs.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let config = &self.state.config;
        let requested = config.bind_address();
        let bind_err = |source| ServerError::Bind {
            addr: requested.clone(),
            source,
        };

        let addr = tokio::net::lookup_host(requested.as_str())
            .await
            .map_err(bind_err)?
            .next()
            .ok_or_else(|| {
                bind_err(std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    "host resolved to no addresses",
                ))
            })?;
        let listener = bind_listener(addr, config).map_err(bind_err)?;
        let local = listener.local_addr()?;

        let sweep = Arc::clone(&self.state.idle).run(
            config.sweep_interval(),
            self.state.shutdown.token(),
        );
        let _ = self.state.shutdown.spawn(sweep);
        let handle = self
            .state
            .shutdown
            .spawn(accept_loop(listener, Arc::clone(&self.state)));

        info!(
            addr = %local,
            backlog = config.backlog,
            idle_timeout_ms = config.idle_timeout_ms,
            "beacon server listening"
        );
        Ok((local, handle))
    }

    /// Stop accepting, close every connection, and wait up to the configured
    /// shutdown timeout. Returns `false` if the wait timed out.
    pub async fn shutdown(&self) -> bool {
        let asked = self.state.registry.close_all(CloseReason::Shutdown);
        info!(connections = asked, "shutting down");
        self.state
            .shutdown
            .graceful_shutdown(self.state.config.shutdown_timeout())
            .await
    }
}

/// Create, configure, bind, and listen on the server socket.
fn bind_listener(addr: SocketAddr, config: &ServerConfig) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    // Inherited by accepted sockets.
    socket.set_keepalive(true)?;
    if let Some(size) = config.recv_buffer_size {
        if let Err(e) = socket.set_recv_buffer_size(size) {
            warn!(size, error = %e, "failed to set SO_RCVBUF");
        }
    }
    if let Some(size) = config.send_buffer_size {
        if let Err(e) = socket.set_send_buffer_size(size) {
            warn!(size, error = %e, "failed to set SO_SNDBUF");
        }
    }
    socket.bind(addr)?;
    socket.listen(config.backlog.max(1))
}

/// Accept connections and spawn a tracked task per socket until shutdown.
async fn accept_loop(listener: TcpListener, state: Arc<AppState>) {
    let cancel = state.shutdown.token();
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            () = cancel.cancelled() => break,
        };
        match accepted {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(%peer, error = %e, "failed to set TCP_NODELAY");
                }
                let id = ConnectionId::new();
                let _ = state
                    .shutdown
                    .spawn(serve_connection(stream, peer, id, Arc::clone(&state)));
            }
            Err(e) => {
                warn!(error = %e, "accept failed, backing off");
                tokio::select! {
                    () = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                    () = cancel.cancelled() => break,
                }
            }
        }
    }
    info!("accept loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn local_config() -> ServerConfig {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            recv_buffer_size: None,
            send_buffer_size: None,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn server_with_default_config() {
        let server = BeaconServer::new(ServerConfig::default());
        assert_eq!(server.config().port, 8888);
        assert_eq!(server.connection_count(), 0);
        assert!(!server.shutdown_coordinator().is_shutting_down());
    }

    #[tokio::test]
    async fn listen_assigns_port() {
        let server = BeaconServer::new(local_config());
        let (addr, _handle) = server.listen().await.unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
        assert!(server.shutdown().await);
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let first = BeaconServer::new(local_config());
        let (addr, _handle) = first.listen().await.unwrap();

        // SO_REUSEADDR does not allow sharing a port with a live listener.
        let second = BeaconServer::new(ServerConfig {
            port: addr.port(),
            ..local_config()
        });
        assert_matches!(second.listen().await, Err(ServerError::Bind { .. }));
        assert!(first.shutdown().await);
    }

    #[tokio::test]
    async fn unresolvable_host_is_bind_error() {
        let server = BeaconServer::new(ServerConfig {
            host: "definitely-not-a-host.invalid".into(),
            ..local_config()
        });
        assert_matches!(server.listen().await, Err(ServerError::Bind { .. }));
    }

    #[tokio::test]
    async fn shutdown_stops_accept_loop() {
        let server = BeaconServer::new(local_config());
        let (_addr, handle) = server.listen().await.unwrap();
        assert!(server.shutdown().await);
        assert!(handle.is_finished());
        assert!(server.shutdown_coordinator().is_shutting_down());
    }
}
