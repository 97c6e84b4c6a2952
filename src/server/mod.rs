//! Server facade
//!
//! Binds the listener, wires the accept loop and coordinator together and
//! exposes the public session stream and traffic counters.
//!
//! ```text
//! socket -> AcceptLoop -> queue -> Coordinator --(client id)--> Pool
//!                                      ^   |                      |
//!            stop / byte counts -------+   +--> sessions <--------+
//! ```

pub mod accept;
pub mod coordinator;
pub mod shutdown;

pub use accept::AcceptBackoff;
pub use coordinator::{Coordinator, CoordinatorSettings, CoordinatorState, DrainReport};
pub use shutdown::ShutdownLatch;

use crate::infrastructure::config::ServerConfig;
use crate::infrastructure::metrics::{MetricsSnapshot, ServerMetrics};
use crate::infrastructure::queue::QueueOut;
use crate::pool::{DirectPoolFactory, PoolFactory, Session};
use crate::{MuxError, Result};
use accept::AcceptLoop;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{lookup_host, TcpListener};
use tokio::task::JoinHandle;

/// Public stream of sessions emitted by pools. Ends once shutdown completes.
pub type SessionStream<S> = QueueOut<S>;

/// Running multiplexer
pub struct Server<S = Session> {
    local_addr: SocketAddr,
    sessions: SessionStream<S>,
    metrics: Arc<ServerMetrics>,
    shutdown: ShutdownLatch,
    accept_task: Option<JoinHandle<()>>,
    coordinator_task: Option<JoinHandle<DrainReport>>,
}

impl Server<Session> {
    /// Bind `addr` and start serving with the direct pool
    pub async fn bind(addr: &str, shared_key: &str) -> Result<Self> {
        let config = ServerConfig::new(addr, shared_key);
        Self::bind_with(&config, DirectPoolFactory::default()).await
    }
}

impl<S: Send + 'static> Server<S> {
    /// Bind the configured address and start the accept loop and coordinator
    ///
    /// # Errors
    /// Returns [`MuxError::Bind`] if the address does not resolve or the
    /// listener cannot be created.
    pub async fn bind_with<F>(config: &ServerConfig, factory: F) -> Result<Self>
    where
        F: PoolFactory<Session = S>,
    {
        let listener = listen(&config.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        let metrics = Arc::new(ServerMetrics::new());
        let shutdown = ShutdownLatch::new();

        let (coordinator, sessions) = Coordinator::new(
            factory,
            Arc::from(config.shared_key.as_str()),
            CoordinatorSettings {
                header_timeout: config.header_timeout(),
                heartbeat_interval: config.heartbeat_interval(),
            },
            Arc::clone(&metrics),
            shutdown.clone(),
        );

        let accept_loop = AcceptLoop {
            listener,
            intake: coordinator.intake(),
            shutdown: shutdown.clone(),
            backoff: AcceptBackoff::new(config.accept_backoff_initial(), config.accept_backoff_max()),
            metrics: Arc::clone(&metrics),
            tcp_nodelay: config.tcp_nodelay,
        };

        let accept_task = tokio::spawn(accept_loop.run());
        let coordinator_task = tokio::spawn(coordinator.run());

        tracing::info!(%local_addr, "server listening");

        Ok(Self {
            local_addr,
            sessions,
            metrics,
            shutdown,
            accept_task: Some(accept_task),
            coordinator_task: Some(coordinator_task),
        })
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Wait for the next session; `None` after shutdown
    pub async fn next_session(&mut self) -> Option<S> {
        self.sessions.recv().await
    }

    /// The public session stream
    pub fn sessions(&mut self) -> &mut SessionStream<S> {
        &mut self.sessions
    }

    /// Total bytes read from clients
    #[inline]
    pub fn bytes_read(&self) -> u64 {
        self.metrics.bytes_read()
    }

    /// Total bytes sent to clients
    #[inline]
    pub fn bytes_sent(&self) -> u64 {
        self.metrics.bytes_sent()
    }

    /// Pools currently owned by the coordinator
    #[inline]
    pub fn live_pools(&self) -> u64 {
        self.metrics.live_pools()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Begin graceful shutdown. Safe to call any number of times.
    pub fn stop(&self) {
        if self.shutdown.trigger() {
            tracing::info!(local_addr = %self.local_addr, "server stopping");
        }
    }

    /// Cloneable handle that can stop the server from elsewhere
    pub fn shutdown_handle(&self) -> ShutdownLatch {
        self.shutdown.clone()
    }

    /// Wait for the accept loop and coordinator to finish
    ///
    /// Does not initiate shutdown; pair with [`Server::stop`].
    pub async fn join(mut self) -> Result<DrainReport> {
        if let Some(task) = self.accept_task.take() {
            task.await.map_err(|e| MuxError::Task(e.to_string()))?;
        }
        match self.coordinator_task.take() {
            Some(task) => task.await.map_err(|e| MuxError::Task(e.to_string())),
            None => Ok(DrainReport::default()),
        }
    }

    /// Stop and wait for the drain to complete
    pub async fn shutdown(self) -> Result<DrainReport> {
        self.stop();
        self.join().await
    }
}

impl<S> std::fmt::Debug for Server<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("local_addr", &self.local_addr)
            .field("live_pools", &self.metrics.live_pools())
            .field("stopping", &self.shutdown.is_triggered())
            .finish_non_exhaustive()
    }
}

impl<S> Drop for Server<S> {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Resolve and bind the listening address
async fn listen(addr: &str) -> Result<TcpListener> {
    let bind_error = |source: io::Error| MuxError::Bind {
        addr: addr.to_string(),
        source,
    };

    let resolved = lookup_host(addr)
        .await
        .map_err(bind_error)?
        .next()
        .ok_or_else(|| bind_error(io::Error::new(io::ErrorKind::NotFound, "address did not resolve")))?;

    TcpListener::bind(resolved).await.map_err(bind_error)
}
