//! Test utilities: a pool factory that records what the coordinator does
//!
//! Recorded pools hold on to every forwarded connection, emit their client id
//! as the session, and expose their stop notifier and byte sinks so tests can
//! play the pool's side of the contract.

use crate::core::ClientId;
use crate::infrastructure::queue::{unbounded, QueueIn};
use crate::pool::{ConnectionPool, PoolContext, PoolFactory, StopNotifier};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// Everything one created pool saw
pub struct PoolRecord {
    pub client_id: ClientId,
    pub generation: u64,
    pub shared_key: String,
    pub connections: AtomicUsize,
    pub stop_calls: AtomicUsize,
    pub stop_notify: StopNotifier,
    pub bytes_read: QueueIn<u64>,
    pub bytes_sent: QueueIn<u64>,
    intake: QueueIn<TcpStream>,
    held: Mutex<Vec<TcpStream>>,
}

impl PoolRecord {
    /// Close the intake without telling the coordinator
    pub fn close_intake(&self) {
        self.intake.stop();
    }

    pub fn held_connections(&self) -> usize {
        self.held.lock().len()
    }
}

/// Pool handed to the coordinator
pub struct RecordingPool {
    record: Arc<PoolRecord>,
    intake: QueueIn<TcpStream>,
}

impl ConnectionPool for RecordingPool {
    fn client_id(&self) -> ClientId {
        self.record.client_id
    }

    fn generation(&self) -> u64 {
        self.record.generation
    }

    fn intake(&self) -> &QueueIn<TcpStream> {
        &self.intake
    }

    fn stop(&mut self) {
        self.record.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.intake.stop();
    }
}

/// Factory whose pools are inspectable from the test
#[derive(Clone, Default)]
pub struct RecordingFactory {
    created: Arc<Mutex<Vec<Arc<PoolRecord>>>>,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pools in creation order
    pub fn pools(&self) -> Vec<Arc<PoolRecord>> {
        self.created.lock().clone()
    }

    /// Connections delivered across every pool
    pub fn total_connections(&self) -> usize {
        self.created
            .lock()
            .iter()
            .map(|p| p.connections.load(Ordering::SeqCst))
            .sum()
    }
}

impl PoolFactory for RecordingFactory {
    type Session = ClientId;
    type Pool = RecordingPool;

    fn create(&mut self, ctx: PoolContext<ClientId>) -> RecordingPool {
        let (intake, mut connections) = unbounded();
        let record = Arc::new(PoolRecord {
            client_id: ctx.client_id,
            generation: ctx.generation,
            shared_key: ctx.shared_key.to_string(),
            connections: AtomicUsize::new(0),
            stop_calls: AtomicUsize::new(0),
            stop_notify: ctx.stop_notify,
            bytes_read: ctx.bytes_read,
            bytes_sent: ctx.bytes_sent,
            intake: intake.clone(),
            held: Mutex::new(Vec::new()),
        });

        let sessions = ctx.sessions;
        let worker = Arc::clone(&record);
        tokio::spawn(async move {
            while let Some(conn) = connections.recv().await {
                worker.held.lock().push(conn);
                worker.connections.fetch_add(1, Ordering::SeqCst);
                let _ = sessions.send(worker.client_id);
            }
        });

        self.created.lock().push(Arc::clone(&record));
        RecordingPool { record, intake }
    }
}

/// Poll `cond` until it holds, panicking after two seconds
pub async fn eventually<F: Fn() -> bool>(what: &str, cond: F) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

/// Connect and write raw header bytes
pub async fn connect_with_header(addr: SocketAddr, header: &[u8]) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(header).await.unwrap();
    stream
}

/// Connect and identify as `id`
pub async fn connect_with_id(addr: SocketAddr, id: u64) -> TcpStream {
    connect_with_header(addr, &ClientId(id).to_header()).await
}
