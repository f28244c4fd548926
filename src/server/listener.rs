//! TCP listener for incoming RCON connections

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use super::connection::{Connection, ConnectionId, ConnectionTask};
use super::registry::ConnectionRegistry;
use crate::auth::PasswordRecord;
use crate::command::CommandExecutor;
use crate::config::Config;
use crate::error::Result;

/// Listener statistics
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub connections_active: AtomicU64,
    /// Connections rejected at the cap
    pub connections_rejected: AtomicU64,
}

/// TCP listener that accepts incoming RCON connections
pub(crate) struct Listener {
    listener: TcpListener,
    config: Arc<Config>,
    registry: Arc<ConnectionRegistry>,
    executor: Arc<dyn CommandExecutor>,
    credential: Option<Arc<PasswordRecord>>,
    stats: Arc<ListenerStats>,
    shutdown_rx: broadcast::Receiver<()>,
    next_connection_id: AtomicU64,
}

impl Listener {
    /// Bind to the configured address. A bind failure is fatal to the
    /// server and propagates to the caller of `start`.
    pub(crate) async fn bind(
        config: Arc<Config>,
        registry: Arc<ConnectionRegistry>,
        executor: Arc<dyn CommandExecutor>,
        credential: Option<Arc<PasswordRecord>>,
        stats: Arc<ListenerStats>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<Self> {
        let addr = format!("{}:{}", config.server.host, config.server.port);
        let listener = TcpListener::bind(&addr).await?;

        info!(
            "Listening on {} (max {} connections)",
            addr, config.server.max_connections
        );

        Ok(Self {
            listener,
            config,
            registry,
            executor,
            credential,
            stats,
            shutdown_rx,
            next_connection_id: AtomicU64::new(1),
        })
    }

    /// Get the local address the listener is bound to.
    ///
    /// This is useful when binding to port 0 to get an OS-assigned port.
    pub(crate) fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the accept loop until shutdown.
    pub(crate) async fn run(mut self) {
        let accept_tick = Duration::from_millis(self.config.server.accept_timeout_ms);

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.accept_connection(stream, addr).await,
                        Err(err) => {
                            error!("Accept error: {}", err);
                            // Brief delay before retrying
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    }
                }

                // Periodic wakeup so a shutdown that raced the accept wait is
                // observed promptly.
                _ = tokio::time::sleep(accept_tick) => continue,

                _ = self.shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping listener");
                    break;
                }
            }
        }

        info!(
            "Listener stopped. Total: {}, Active: {}, Rejected: {}",
            self.stats.connections_accepted.load(Ordering::Relaxed),
            self.stats.connections_active.load(Ordering::Relaxed),
            self.stats.connections_rejected.load(Ordering::Relaxed)
        );
    }

    async fn accept_connection(&self, stream: TcpStream, addr: std::net::SocketAddr) {
        // Cap check against the registry before allocating anything; excess
        // sockets are dropped, never queued.
        if self.registry.len().await >= self.config.server.max_connections {
            warn!(remote_ip = %addr.ip(), "transport.rate_limit");
            self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
            drop(stream);
            return;
        }

        if let Err(err) = stream.set_nodelay(true) {
            debug!(remote_ip = %addr.ip(), error = %err, "failed to disable Nagle");
        }

        let id = ConnectionId(self.next_connection_id.fetch_add(1, Ordering::Relaxed));
        let (reader, writer) = stream.into_split();
        let connection = Arc::new(Connection::new(id, addr, writer));

        self.registry.insert(Arc::clone(&connection)).await;
        self.stats.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

        info!(
            connection_id = %id,
            remote_ip = %addr.ip(),
            remote_port = addr.port(),
            "transport.connect"
        );

        let task = ConnectionTask {
            conn: connection,
            reader,
            registry: Arc::clone(&self.registry),
            executor: Arc::clone(&self.executor),
            credential: self.credential.clone(),
            max_frame_size: self.config.server.max_frame_size,
            read_timeout: Duration::from_millis(self.config.server.read_timeout_ms),
            shutdown_rx: self.shutdown_rx.resubscribe(),
        };

        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            task.run().await;
            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
        });
    }
}
