use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;

use super::connection::{Connection, ConnectionId};
use crate::obs::ACCESS;

/// Server-side set of live connections, keyed by transport identity.
///
/// Snapshots hold owning references: a connection listed by
/// [`snapshot`](Self::snapshot) stays allocated while the caller keeps the
/// list, even after its transport has closed (check `state()` before use).
pub struct ConnectionRegistry {
    live: DashMap<ConnectionId, Arc<Connection>>,
    count: watch::Sender<usize>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            live: DashMap::new(),
            count: watch::channel(0).0,
        }
    }

    pub fn insert(&self, conn: Arc<Connection>) {
        let id = conn.id();
        if self.live.insert(id, conn).is_none() {
            self.count.send_modify(|n| *n += 1);
        }
        tracing::debug!(target: ACCESS, conn = %id, "registered");
    }

    pub fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        let Some((_, conn)) = self.live.remove(&id) else {
            tracing::warn!(conn = %id, "close for a connection that is not registered");
            return None;
        };
        self.count.send_modify(|n| *n = n.saturating_sub(1));
        Some(conn)
    }

    /// Point-in-time copy of the live connections.
    pub fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.live.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn close_all(&self) {
        for conn in self.snapshot() {
            conn.close();
        }
    }

    /// Resolves once the registry is empty.
    pub async fn wait_empty(&self) {
        let mut rx = self.count.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}
