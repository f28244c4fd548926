//! Connection manager: listener, registry, per-connection tasks, lifecycle.

mod connection;
mod listener;
mod registry;

pub use connection::ConnectionId;
pub use listener::ListenerStats;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::auth::PasswordRecord;
use crate::command::CommandExecutor;
use crate::config::Config;
use crate::error::{RconError, Result};
use listener::Listener;
use registry::ConnectionRegistry;

/// How long `stop` waits for read tasks to drain before giving up.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// The RCON server: owns the listener, the connection registry, and the
/// background sweeper.
///
/// Construct with a validated [`Config`] and a [`CommandExecutor`]
/// capability, then [`start`](RconServer::start) it. After
/// [`stop`](RconServer::stop) the instance is terminal; a restart
/// requires a fresh instance.
pub struct RconServer {
    config: Arc<Config>,
    executor: Arc<dyn CommandExecutor>,
    credential: Option<Arc<PasswordRecord>>,
    registry: Arc<ConnectionRegistry>,
    stats: Arc<ListenerStats>,
    shutdown_tx: broadcast::Sender<()>,
    listener_handle: Option<JoinHandle<()>>,
    sweeper_handle: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
    started: bool,
    stopped: bool,
}

impl RconServer {
    /// Create a server from a configuration and an executor capability.
    ///
    /// Fails on invalid configuration, including a credential entry that
    /// does not parse.
    pub fn new(config: Config, executor: Arc<dyn CommandExecutor>) -> Result<Self> {
        config.validate().map_err(RconError::Config)?;
        let credential = config.credential_record().map(Arc::new);
        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Self {
            config: Arc::new(config),
            executor,
            credential,
            registry: Arc::new(ConnectionRegistry::new()),
            stats: Arc::new(ListenerStats::default()),
            shutdown_tx,
            listener_handle: None,
            sweeper_handle: None,
            local_addr: None,
            started: false,
            stopped: false,
        })
    }

    /// Bind the listener and start accepting connections.
    ///
    /// Returns the bound address (relevant when configured with port 0).
    /// A bind failure propagates and the server does not start.
    pub async fn start(&mut self) -> Result<SocketAddr> {
        if self.stopped {
            return Err(RconError::ServerState(
                "server already stopped; construct a fresh instance".into(),
            ));
        }
        if self.started {
            return Err(RconError::ServerState("server already started".into()));
        }

        if self.credential.is_none() {
            warn!("No credential configured; any authentication attempt will succeed");
        }

        let listener = Listener::bind(
            Arc::clone(&self.config),
            Arc::clone(&self.registry),
            Arc::clone(&self.executor),
            self.credential.clone(),
            Arc::clone(&self.stats),
            self.shutdown_tx.subscribe(),
        )
        .await?;
        let local_addr = listener.local_addr()?;

        self.sweeper_handle = Some(ConnectionRegistry::start_sweeper(
            Arc::clone(&self.registry),
            Duration::from_millis(self.config.server.read_timeout_ms),
            Duration::from_millis(self.config.server.accept_timeout_ms),
            self.shutdown_tx.subscribe(),
        ));
        self.listener_handle = Some(tokio::spawn(listener.run()));

        self.local_addr = Some(local_addr);
        self.started = true;
        Ok(local_addr)
    }

    /// Stop accepting, close every live connection, and wait (bounded)
    /// for read tasks to drain. Idempotent; the server is terminal
    /// afterwards.
    pub async fn stop(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        let _ = self.shutdown_tx.send(());
        let closed = self.registry.close_all("server shutdown").await;
        if closed > 0 {
            info!("Closing {} live connection(s) for shutdown", closed);
        }

        let deadline = tokio::time::Instant::now() + SHUTDOWN_GRACE;
        while self.registry.len().await > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        if let Some(handle) = self.listener_handle.take() {
            let _ = handle.await;
        }
        if let Some(handle) = self.sweeper_handle.take() {
            let _ = handle.await;
        }

        info!(
            "Server stopped. Total connections handled: {}",
            self.stats
                .connections_accepted
                .load(std::sync::atomic::Ordering::Relaxed)
        );
    }

    /// Listener statistics.
    pub fn stats(&self) -> Arc<ListenerStats> {
        Arc::clone(&self.stats)
    }

    /// The bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.registry.len().await
    }
}
