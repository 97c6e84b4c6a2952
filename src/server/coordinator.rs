//! Coordinator: the single-threaded event loop
//!
//! Owns the client -> pool table and the byte totals. Nothing else touches
//! them, so there is no lock anywhere in here; every other task talks to the
//! coordinator through queue adapters.
//!
//! Event sources, polled in one `select!` with no fixed priority:
//! 1. new connection from the accept loop
//! 2. heartbeat tick
//! 3. pool stop notification
//! 4. bytes-read report
//! 5. bytes-sent report
//! 6. shutdown latch
//!
//! State machine: `Running` -> `Draining` (finalizer) -> `Stopped`.

use crate::core::{read_client_id, ClientId};
use crate::infrastructure::metrics::ServerMetrics;
use crate::infrastructure::queue::{unbounded, QueueIn, QueueOut};
use crate::pool::{ConnectionPool, PoolContext, PoolFactory, PoolStopped, StopNotifier};
use crate::server::shutdown::ShutdownLatch;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::Level;

/// Coordinator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Running,
    Draining,
    Stopped,
}

/// Summary returned once the coordinator has stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Pools still live at shutdown, each stopped by the finalizer
    pub pools_stopped: usize,
    /// Heartbeat ticks observed while running
    pub heartbeats: u64,
}

/// Timing knobs for the coordinator
#[derive(Debug, Clone, Copy)]
pub struct CoordinatorSettings {
    pub header_timeout: Duration,
    pub heartbeat_interval: Duration,
}

enum Event {
    Connection(TcpStream),
    Heartbeat,
    PoolStopped(PoolStopped),
    BytesRead(u64),
    BytesSent(u64),
    Shutdown,
}

struct PoolEntry<P> {
    pool: P,
    generation: u64,
}

/// Queue ends the coordinator drains or hands out
struct Channels<S> {
    connections_in: QueueIn<TcpStream>,
    connections: QueueOut<TcpStream>,
    sessions: QueueIn<S>,
    stopped_in: QueueIn<PoolStopped>,
    stopped: QueueOut<PoolStopped>,
    bytes_read_in: QueueIn<u64>,
    bytes_read: QueueOut<u64>,
    bytes_sent_in: QueueIn<u64>,
    bytes_sent: QueueOut<u64>,
}

impl<S> Channels<S> {
    fn release(&self) {
        self.sessions.stop();
        self.connections_in.stop();
        self.stopped_in.stop();
        self.bytes_read_in.stop();
        self.bytes_sent_in.stop();
    }
}

/// Central event loop
pub struct Coordinator<F: PoolFactory> {
    factory: F,
    shared_key: Arc<str>,
    settings: CoordinatorSettings,
    pools: HashMap<ClientId, PoolEntry<F::Pool>>,
    next_generation: u64,
    heartbeats: u64,
    state: CoordinatorState,
    channels: Channels<F::Session>,
    metrics: Arc<ServerMetrics>,
    shutdown: ShutdownLatch,
}

impl<F: PoolFactory> Coordinator<F> {
    /// Build a coordinator and the public session stream it feeds
    pub fn new(
        factory: F,
        shared_key: Arc<str>,
        settings: CoordinatorSettings,
        metrics: Arc<ServerMetrics>,
        shutdown: ShutdownLatch,
    ) -> (Self, QueueOut<F::Session>) {
        let (connections_in, connections) = unbounded();
        let (sessions, session_stream) = unbounded();
        let (stopped_in, stopped) = unbounded();
        let (bytes_read_in, bytes_read) = unbounded();
        let (bytes_sent_in, bytes_sent) = unbounded();
        let coordinator = Self {
            factory,
            shared_key,
            settings,
            pools: HashMap::new(),
            next_generation: 0,
            heartbeats: 0,
            state: CoordinatorState::Running,
            channels: Channels {
                connections_in,
                connections,
                sessions,
                stopped_in,
                stopped,
                bytes_read_in,
                bytes_read,
                bytes_sent_in,
                bytes_sent,
            },
            metrics,
            shutdown,
        };
        (coordinator, session_stream)
    }

    /// Inbound side of the new-connection intake, for the accept loop
    pub fn intake(&self) -> QueueIn<TcpStream> {
        self.channels.connections_in.clone()
    }

    /// Current lifecycle state
    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Number of live pools
    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Run until the shutdown latch fires, then drain
    pub async fn run(mut self) -> DrainReport {
        // interval() panics on a zero period
        let period = self.settings.heartbeat_interval.max(Duration::from_millis(1));
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let shutdown = self.shutdown.clone();

        crate::log_coordinator!(Level::DEBUG, "coordinator running");

        loop {
            let channels = &mut self.channels;
            let event = tokio::select! {
                Some(conn) = channels.connections.recv() => Event::Connection(conn),
                _ = heartbeat.tick() => Event::Heartbeat,
                Some(stopped) = channels.stopped.recv() => Event::PoolStopped(stopped),
                Some(n) = channels.bytes_read.recv() => Event::BytesRead(n),
                Some(n) = channels.bytes_sent.recv() => Event::BytesSent(n),
                _ = shutdown.triggered() => Event::Shutdown,
            };

            match event {
                Event::Connection(conn) => self.route(conn).await,
                Event::Heartbeat => self.heartbeat(),
                Event::PoolStopped(stopped) => self.remove_stopped(stopped),
                Event::BytesRead(n) => self.metrics.add_bytes_read(n),
                Event::BytesSent(n) => self.metrics.add_bytes_sent(n),
                Event::Shutdown => break,
            }
        }

        self.finalize()
    }

    /// Read the client header and forward the connection to its pool
    async fn route(&mut self, mut conn: TcpStream) {
        let client_id = match read_client_id(&mut conn, self.settings.header_timeout).await {
            Ok(id) => id,
            Err(e) => {
                self.metrics.record_header_rejected();
                crate::log_coordinator!(
                    Level::DEBUG,
                    peer = ?conn.peer_addr().ok(),
                    "dropping connection: {}",
                    e
                );
                return;
            }
        };

        // No pools are created once shutdown has started; the finalizer
        // would never see them
        if self.shutdown.is_triggered() {
            crate::log_coordinator!(
                Level::DEBUG,
                %client_id,
                "shutting down, dropping connection"
            );
            return;
        }

        if !self.pools.contains_key(&client_id) {
            self.create_pool(client_id);
        }

        let conn = match self.forward(client_id, conn) {
            Ok(()) => return,
            Err(conn) => conn,
        };

        // Intake already closed: the pool is going away but its stop
        // notification has not been processed. Replace it.
        crate::log_coordinator!(
            Level::DEBUG,
            %client_id,
            "pool intake closed, replacing pool"
        );
        if let Some(mut entry) = self.pools.remove(&client_id) {
            entry.pool.stop();
            self.metrics.record_pool_stopped(self.pools.len());
        }
        self.create_pool(client_id);
        if self.forward(client_id, conn).is_err() {
            crate::log_coordinator!(
                Level::WARN,
                %client_id,
                "fresh pool rejected connection, dropping it"
            );
        }
    }

    fn forward(&self, client_id: ClientId, conn: TcpStream) -> Result<(), TcpStream> {
        let Some(entry) = self.pools.get(&client_id) else {
            return Err(conn);
        };
        match entry.pool.intake().send(conn) {
            Ok(()) => {
                self.metrics.record_routed();
                Ok(())
            }
            Err(rejected) => Err(rejected.into_inner()),
        }
    }

    fn create_pool(&mut self, client_id: ClientId) {
        let generation = self.next_generation;
        self.next_generation += 1;

        let ctx = PoolContext {
            client_id,
            generation,
            shared_key: Arc::clone(&self.shared_key),
            sessions: self.channels.sessions.clone(),
            stop_notify: StopNotifier::new(client_id, generation, self.channels.stopped_in.clone()),
            bytes_read: self.channels.bytes_read_in.clone(),
            bytes_sent: self.channels.bytes_sent_in.clone(),
        };
        let pool = self.factory.create(ctx);
        self.pools.insert(client_id, PoolEntry { pool, generation });
        self.metrics.record_pool_created(self.pools.len());

        crate::log_coordinator!(
            Level::INFO,
            %client_id,
            generation,
            "new conn pool"
        );
    }

    fn heartbeat(&mut self) {
        self.heartbeats += 1;
        self.metrics.record_heartbeat();
        crate::log_coordinator!(
            Level::DEBUG,
            tick = self.heartbeats,
            pools = self.pools.len(),
            "heartbeat"
        );
    }

    fn remove_stopped(&mut self, stopped: PoolStopped) {
        let current = self.pools.get(&stopped.client_id).map(|e| e.generation);
        if current != Some(stopped.generation) {
            crate::log_coordinator!(
                Level::DEBUG,
                client_id = %stopped.client_id,
                generation = stopped.generation,
                "ignoring stale pool stop"
            );
            return;
        }

        self.pools.remove(&stopped.client_id);
        self.metrics.record_pool_stopped(self.pools.len());
        crate::log_coordinator!(
            Level::INFO,
            client_id = %stopped.client_id,
            "conn pool stopped"
        );
    }

    /// Stop every live pool, then release every queue
    fn finalize(&mut self) -> DrainReport {
        self.state = CoordinatorState::Draining;
        crate::log_coordinator!(
            Level::INFO,
            pools = self.pools.len(),
            "coordinator draining"
        );

        let mut pools_stopped = 0;
        for (client_id, mut entry) in self.pools.drain() {
            entry.pool.stop();
            pools_stopped += 1;
            crate::log_coordinator!(Level::DEBUG, %client_id, "stopped pool at shutdown");
        }
        self.metrics.record_pools_drained(pools_stopped);

        self.channels.release();
        self.state = CoordinatorState::Stopped;
        crate::log_coordinator!(Level::INFO, "coordinator stopped");

        DrainReport {
            pools_stopped,
            heartbeats: self.heartbeats,
        }
    }
}
