//! Idle-timeout eviction.
//!
//! One shared sweep task replaces per-connection timers. Detection latency is
//! at most one sweep interval past the nominal timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use beacon_core::ConnectionId;
use parking_lot::Mutex;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::connection::{CloseHandle, CloseReason};

struct IdleEntry {
    last_activity: Instant,
    closer: CloseHandle,
}

/// Tracks last inbound activity per connection and closes idle ones.
pub struct IdleMonitor {
    timeout: Duration,
    entries: Mutex<HashMap<ConnectionId, IdleEntry>>,
}

impl IdleMonitor {
    /// Create a monitor with the given idle window.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Configured idle window.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Start watching a connection; its activity clock starts now.
    pub fn arm(&self, id: ConnectionId, closer: CloseHandle) {
        let entry = IdleEntry {
            last_activity: Instant::now(),
            closer,
        };
        let _ = self.entries.lock().insert(id, entry);
    }

    /// Record inbound activity. Unknown IDs are ignored.
    pub fn touch(&self, id: &ConnectionId) {
        if let Some(entry) = self.entries.lock().get_mut(id) {
            entry.last_activity = Instant::now();
        }
    }

    /// Stop watching a connection. Returns whether it was armed.
    pub fn disarm(&self, id: &ConnectionId) -> bool {
        self.entries.lock().remove(id).is_some()
    }

    /// Number of watched connections.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing is being watched.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Remove every entry idle longer than the window and fire its close
    /// handle with [`CloseReason::IdleTimeout`]. Returns the expired IDs.
    pub fn sweep(&self) -> Vec<ConnectionId> {
        let now = Instant::now();
        let expired: Vec<(ConnectionId, CloseHandle)> = {
            let mut entries = self.entries.lock();
            let ids: Vec<ConnectionId> = entries
                .iter()
                .filter(|(_, e)| now.duration_since(e.last_activity) >= self.timeout)
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| entries.remove(&id).map(|e| (id, e.closer)))
                .collect()
        };

        for (id, closer) in &expired {
            if closer.close(CloseReason::IdleTimeout) {
                info!(connection_id = %id, timeout_ms = self.timeout.as_millis(), "closing idle connection");
            }
        }
        expired.into_iter().map(|(id, _)| id).collect()
    }

    /// Run the periodic sweep until `cancel` fires.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first tick
        let _ = ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let expired = self.sweep();
                    if !expired.is_empty() {
                        debug!(count = expired.len(), "idle sweep expired connections");
                    }
                }
                () = cancel.cancelled() => break,
            }
        }
        debug!("idle sweep stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handle() -> CloseHandle {
        CloseHandle::new(CancellationToken::new())
    }

    #[tokio::test(start_paused = true)]
    async fn expires_after_timeout() {
        let monitor = IdleMonitor::new(Duration::from_millis(100));
        let closer = handle();
        monitor.arm(ConnectionId::from("c1"), closer.clone());

        time::advance(Duration::from_millis(50)).await;
        assert!(monitor.sweep().is_empty());
        assert!(!closer.is_closed());

        time::advance(Duration::from_millis(60)).await;
        assert_eq!(monitor.sweep(), vec![ConnectionId::from("c1")]);
        assert_eq!(closer.reason(), Some(CloseReason::IdleTimeout));
        assert!(monitor.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn touch_resets_window() {
        let monitor = IdleMonitor::new(Duration::from_millis(100));
        let closer = handle();
        let id = ConnectionId::from("c1");
        monitor.arm(id.clone(), closer.clone());

        for _ in 0..5 {
            time::advance(Duration::from_millis(80)).await;
            monitor.touch(&id);
            assert!(monitor.sweep().is_empty());
        }
        assert!(!closer.is_closed());
        assert_eq!(monitor.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disarmed_connection_never_fires() {
        let monitor = IdleMonitor::new(Duration::from_millis(100));
        let closer = handle();
        let id = ConnectionId::from("c1");
        monitor.arm(id.clone(), closer.clone());
        assert!(monitor.disarm(&id));
        assert!(!monitor.disarm(&id));

        time::advance(Duration::from_secs(1)).await;
        assert!(monitor.sweep().is_empty());
        assert!(!closer.is_closed());
    }

    #[test]
    fn touch_unknown_is_noop() {
        let monitor = IdleMonitor::new(Duration::from_secs(1));
        monitor.touch(&ConnectionId::from("ghost"));
        assert!(monitor.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn only_idle_peers_expire() {
        let monitor = IdleMonitor::new(Duration::from_millis(100));
        let idle = handle();
        let busy = handle();
        monitor.arm(ConnectionId::from("idle"), idle.clone());
        monitor.arm(ConnectionId::from("busy"), busy.clone());

        time::advance(Duration::from_millis(90)).await;
        monitor.touch(&ConnectionId::from("busy"));
        time::advance(Duration::from_millis(20)).await;

        assert_eq!(monitor.sweep(), vec![ConnectionId::from("idle")]);
        assert!(idle.is_closed());
        assert!(!busy.is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_evicts_and_stops_on_cancel() {
        let monitor = Arc::new(IdleMonitor::new(Duration::from_millis(100)));
        let closer = handle();
        monitor.arm(ConnectionId::from("c1"), closer.clone());

        let cancel = CancellationToken::new();
        let task = tokio::spawn(Arc::clone(&monitor).run(Duration::from_millis(10), cancel.clone()));

        // Latency is bounded by one sweep interval past the timeout.
        time::sleep(Duration::from_millis(115)).await;
        assert_eq!(closer.reason(), Some(CloseReason::IdleTimeout));

        cancel.cancel();
        task.await.unwrap();
    }
}
