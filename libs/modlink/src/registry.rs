//! Connection registry
//!
//! Owns the set of managed connections. This is the only structure shared
//! across the whole process, guarded by its own lock so registry mutations
//! never block per-connection I/O: entries are taken out under the lock and
//! closed after it is released.

use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::client::{ClientFactory, TcpClientFactory};
use crate::connection::ManagedConnection;
use crate::types::{ConnectionSnapshot, ConnectionSpec};

/// Registry of managed connections, in creation order
pub struct ConnectionRegistry {
    factory: Arc<dyn ClientFactory>,
    connections: Mutex<Vec<Arc<ManagedConnection>>>,
}

impl ConnectionRegistry {
    /// Registry backed by real TCP sessions
    pub fn new() -> Self {
        Self::with_factory(Arc::new(TcpClientFactory))
    }

    /// Registry with an injected client factory (test seam)
    pub fn with_factory(factory: Arc<dyn ClientFactory>) -> Self {
        Self {
            factory,
            connections: Mutex::new(Vec::new()),
        }
    }

    /// Allocate and register a connection, returning its id.
    ///
    /// With `eager_connect` the first connect happens here, best-effort:
    /// failure never aborts creation.
    pub async fn create(&self, spec: ConnectionSpec) -> Uuid {
        let eager = spec.eager_connect;
        let conn = Arc::new(ManagedConnection::new(spec, Arc::clone(&self.factory)));

        if eager && !conn.connect().await {
            warn!("Eager connect failed: {}", conn.endpoint());
        }

        let id = conn.id();
        info!("Registered connection {} ({})", id, conn.endpoint());
        self.connections.lock().await.push(conn);
        id
    }

    /// Snapshot copies of every connection, in creation order
    pub async fn list(&self) -> Vec<ConnectionSnapshot> {
        let connections: Vec<_> = self.connections.lock().await.iter().cloned().collect();

        let mut snapshots = Vec::with_capacity(connections.len());
        for conn in connections {
            snapshots.push(conn.snapshot().await);
        }
        snapshots
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<ManagedConnection>> {
        self.connections
            .lock()
            .await
            .iter()
            .find(|c| c.id() == id)
            .cloned()
    }

    /// Stop the poller, close the socket and forget the connection.
    /// A no-op when the id is unknown.
    pub async fn remove(&self, id: Uuid) {
        let conn = {
            let mut connections = self.connections.lock().await;
            connections
                .iter()
                .position(|c| c.id() == id)
                .map(|i| connections.remove(i))
        };

        if let Some(conn) = conn {
            conn.stop_poll().await;
            conn.close().await;
            info!("Removed connection {} ({})", id, conn.endpoint());
        }
    }

    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    /// Stop and close every owned connection
    pub async fn shutdown(&self) {
        let drained: Vec<_> = {
            let mut connections = self.connections.lock().await;
            connections.drain(..).collect()
        };

        for conn in drained {
            conn.stop_poll().await;
            conn.close().await;
        }
        info!("Registry shut down");
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
