//! Live-connection registry and the idle sweeper.
//!
//! The registry is the single source of truth for liveness: a connection
//! is live iff it is present here. Read tasks remove their own entry as
//! part of closing, so the count the acceptor checks against the
//! connection cap is always accurate.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;

use super::connection::{Connection, ConnectionId};

pub(crate) struct ConnectionRegistry {
    connections: RwLock<HashMap<u64, Arc<Connection>>>,
}

impl ConnectionRegistry {
    pub(crate) fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    pub(crate) async fn insert(&self, connection: Arc<Connection>) {
        self.connections
            .write()
            .await
            .insert(connection.id().0, connection);
    }

    pub(crate) async fn remove(&self, id: ConnectionId) -> Option<Arc<Connection>> {
        self.connections.write().await.remove(&id.0)
    }

    pub(crate) async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    pub(crate) async fn snapshot(&self) -> Vec<Arc<Connection>> {
        self.connections.read().await.values().cloned().collect()
    }

    /// Mark every live connection closed with the given reason. The read
    /// tasks observe the latch and release their resources.
    pub(crate) async fn close_all(&self, reason: &str) -> usize {
        let mut closed = 0;
        for connection in self.snapshot().await {
            if connection.begin_close(reason) {
                closed += 1;
            }
        }
        closed
    }

    /// Background sweeper closing connections idle past `idle_limit`.
    ///
    /// Socket read timeouts are the primary idle mechanism; this is the
    /// fallback for connections that authenticated and then stopped
    /// reading and writing entirely.
    pub(crate) fn start_sweeper(
        registry: Arc<Self>,
        idle_limit: Duration,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(interval) => {
                        for connection in registry.snapshot().await {
                            if !connection.is_closed() && connection.idle_for() > idle_limit {
                                debug!(
                                    connection_id = %connection.id(),
                                    remote_ip = %connection.remote_addr().ip(),
                                    idle_ms = connection.idle_for().as_millis() as u64,
                                    "sweeping idle connection"
                                );
                                connection.begin_close("idle timeout");
                            }
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    ::static_assertions::assert_impl_all!(ConnectionRegistry: Send, Sync);
}
