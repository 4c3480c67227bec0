//! Collaborator hooks for connection lifecycle and binary traffic.

use beacon_core::{ConnectionId, Frame, ProtocolMode};
use tracing::{debug, info};

use crate::connection::CloseReason;

/// Callbacks invoked from connection tasks.
///
/// Implementations must be cheap and non-blocking; they run inline on the
/// connection's task. Frames from one connection arrive in order.
pub trait ConnectionObserver: Send + Sync {
    /// A connection finished protocol detection and was registered.
    fn on_connection_opened(&self, _id: &ConnectionId, _mode: ProtocolMode) {}

    /// A registered connection was torn down.
    fn on_connection_closed(&self, _id: &ConnectionId, _reason: CloseReason) {}

    /// A complete binary frame was decoded.
    fn on_binary_frame(&self, _id: &ConnectionId, _frame: &Frame) {}
}

/// Observer that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl ConnectionObserver for NoopObserver {}

/// Observer that reports events through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingObserver;

impl ConnectionObserver for TracingObserver {
    fn on_connection_opened(&self, id: &ConnectionId, mode: ProtocolMode) {
        info!(connection_id = %id, %mode, "connection opened");
    }

    fn on_connection_closed(&self, id: &ConnectionId, reason: CloseReason) {
        info!(connection_id = %id, %reason, "connection closed");
    }

    fn on_binary_frame(&self, id: &ConnectionId, frame: &Frame) {
        debug!(
            connection_id = %id,
            marker = frame.header.marker,
            device_type = frame.header.device_type,
            serial = frame.header.serial,
            body_len = frame.body_len(),
            "binary frame"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beacon_core::FrameHeader;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Counting {
        events: Mutex<Vec<String>>,
    }

    impl ConnectionObserver for Counting {
        fn on_connection_opened(&self, id: &ConnectionId, mode: ProtocolMode) {
            self.events.lock().push(format!("open {id} {mode}"));
        }
    }

    #[test]
    fn default_methods_are_noops() {
        let observer = Counting::default();
        let id = ConnectionId::from("c1");
        observer.on_connection_opened(&id, ProtocolMode::Binary);
        observer.on_connection_closed(&id, CloseReason::PeerClosed);
        observer.on_binary_frame(&id, &Frame::new(FrameHeader::default(), &b"x"[..]));
        assert_eq!(*observer.events.lock(), vec!["open c1 binary".to_string()]);
    }

    #[test]
    fn builtin_observers_are_object_safe() {
        let observers: Vec<Box<dyn ConnectionObserver>> =
            vec![Box::new(NoopObserver), Box::new(TracingObserver)];
        let id = ConnectionId::from("c1");
        for observer in &observers {
            observer.on_connection_opened(&id, ProtocolMode::WebSocket);
            observer.on_connection_closed(&id, CloseReason::IdleTimeout);
        }
    }
}
