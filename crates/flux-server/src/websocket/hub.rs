//! Registry of live connections.

use std::collections::HashMap;
use std::sync::Arc;

use flux_core::{ConnectionId, Envelope, EnvelopeError};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::debug;

use super::connection::ClientConnection;

/// Delivery failures.
#[derive(Debug, thiserror::Error)]
pub enum HubError {
    /// No connection with this id is registered.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The connection's outbound queue has been closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(ConnectionId),

    /// The outbound queue is full; the message was dropped.
    #[error("outbound queue full for {0}")]
    BackpressureExceeded(ConnectionId),

    /// The envelope could not be serialized.
    #[error(transparent)]
    Encode(#[from] EnvelopeError),
}

impl HubError {
    /// Stable code for logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownConnection(_) => "unknown_connection",
            Self::ConnectionClosed(_) => "connection_closed",
            Self::BackpressureExceeded(_) => "backpressure_exceeded",
            Self::Encode(_) => "encode_failed",
        }
    }
}

/// Tracks every open connection by id.
pub struct ConnectionHub {
    connections: RwLock<HashMap<ConnectionId, Arc<ClientConnection>>>,
    buffer: usize,
}

impl ConnectionHub {
    /// Hub whose connections get outbound queues of `buffer` frames.
    pub fn new(buffer: usize) -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
        }
    }

    /// Create and register a connection, returning it with the receiving
    /// half of its outbound queue.
    pub fn register(&self) -> (Arc<ClientConnection>, mpsc::Receiver<Arc<String>>) {
        let (tx, rx) = mpsc::channel(self.buffer);
        let conn = Arc::new(ClientConnection::new(ConnectionId::new(), tx));
        let _ = self
            .connections
            .write()
            .insert(conn.id.clone(), Arc::clone(&conn));
        debug!(conn_id = %conn.id, "connection registered");
        (conn, rx)
    }

    /// Remove and close a connection. A second call is a no-op.
    pub fn unregister(&self, id: &ConnectionId) -> bool {
        let removed = self.connections.write().remove(id);
        match removed {
            Some(conn) => {
                let _ = conn.close();
                debug!(conn_id = %id, "connection unregistered");
                true
            }
            None => false,
        }
    }

    /// Look up a connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.read().get(id).cloned()
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.read().len()
    }

    /// Serialize `envelope` and enqueue it for `id`.
    pub fn send(&self, id: &ConnectionId, envelope: &Envelope) -> Result<(), HubError> {
        let conn = self
            .get(id)
            .ok_or_else(|| HubError::UnknownConnection(id.clone()))?;
        conn.send_envelope(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn register_and_count() {
        let hub = ConnectionHub::new(8);
        let (a, _rx_a) = hub.register();
        let (b, _rx_b) = hub.register();
        assert_ne!(a.id, b.id);
        assert_eq!(hub.connection_count(), 2);
        assert!(hub.get(&a.id).is_some());
    }

    #[test]
    fn send_reaches_queue() {
        let hub = ConnectionHub::new(8);
        let (conn, mut rx) = hub.register();
        hub.send(&conn.id, &Envelope::error("boom")).unwrap();
        let frame = rx.try_recv().unwrap();
        assert!(frame.contains(r#""type":"error""#));
    }

    #[test]
    fn send_to_unknown_connection() {
        let hub = ConnectionHub::new(8);
        let result = hub.send(&ConnectionId::new(), &Envelope::error("x"));
        assert_matches!(result, Err(HubError::UnknownConnection(_)));
    }

    #[test]
    fn send_backpressure() {
        let hub = ConnectionHub::new(1);
        let (conn, _rx) = hub.register();
        hub.send(&conn.id, &Envelope::error("1")).unwrap();
        let err = hub.send(&conn.id, &Envelope::error("2")).unwrap_err();
        assert_eq!(err.code(), "backpressure_exceeded");
        // Still registered: backpressure is not a connection fault.
        assert_eq!(hub.connection_count(), 1);
    }

    #[test]
    fn unregister_closes_once() {
        let hub = ConnectionHub::new(8);
        let (conn, _rx) = hub.register();
        assert!(hub.unregister(&conn.id));
        assert!(!hub.unregister(&conn.id));
        assert!(conn.is_closed());
        assert_eq!(hub.connection_count(), 0);
        assert_matches!(
            hub.send(&conn.id, &Envelope::error("x")),
            Err(HubError::UnknownConnection(_))
        );
    }

    #[test]
    fn zero_buffer_is_clamped() {
        let hub = ConnectionHub::new(0);
        let (conn, _rx) = hub.register();
        assert!(conn.send_envelope(&Envelope::error("x")).is_ok());
    }
}
