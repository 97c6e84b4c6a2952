//! Direct pool: one session per physical connection
//!
//! The simplest pool that honors the full contract. Every forwarded
//! connection becomes a [`Session`] wrapping a [`MeteredStream`], which
//! reports read/written byte counts to the coordinator. Once the pool has
//! had no live session for the idle timeout it signals stop and closes its
//! intake.

use crate::core::ClientId;
use crate::infrastructure::config::PoolConfig;
use crate::infrastructure::queue::{unbounded, QueueIn, QueueOut};
use crate::pool::{ConnectionPool, PoolContext, PoolFactory};
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// Stream wrapper that reports every transferred byte
///
/// Counts are pushed to non-blocking queue adapters, so metering never
/// stalls I/O.
pub struct MeteredStream<S> {
    inner: S,
    bytes_read: QueueIn<u64>,
    bytes_sent: QueueIn<u64>,
    _live: Option<LiveGuard>,
}

impl<S> MeteredStream<S> {
    pub fn new(inner: S, bytes_read: QueueIn<u64>, bytes_sent: QueueIn<u64>) -> Self {
        Self {
            inner,
            bytes_read,
            bytes_sent,
            _live: None,
        }
    }

    fn with_live(mut self, live: LiveGuard) -> Self {
        self._live = Some(live);
        self
    }

    /// Get reference to the wrapped stream
    pub fn get_ref(&self) -> &S {
        &self.inner
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for MeteredStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let poll = Pin::new(&mut this.inner).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = poll {
            let n = buf.filled().len() - before;
            if n > 0 {
                // Coordinator gone means shutdown; nothing left to count for
                let _ = this.bytes_read.send(n as u64);
            }
        }
        poll
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for MeteredStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let poll = Pin::new(&mut this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = poll {
            if n > 0 {
                let _ = this.bytes_sent.send(n as u64);
            }
        }
        poll
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Keeps a pool's live-session count up while held
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        Self(count)
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Session emitted by [`DirectPool`]
///
/// Reads and writes go straight to the client connection (minus its
/// header). Framing and use of the shared key are up to the consumer.
pub struct Session {
    client_id: ClientId,
    peer_addr: Option<SocketAddr>,
    shared_key: Arc<str>,
    stream: MeteredStream<TcpStream>,
}

impl Session {
    #[inline]
    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    #[inline]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    #[inline]
    pub fn shared_key(&self) -> &str {
        &self.shared_key
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("client_id", &self.client_id)
            .field("peer_addr", &self.peer_addr)
            .finish_non_exhaustive()
    }
}

impl AsyncRead for Session {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_read(cx, buf)
    }
}

impl AsyncWrite for Session {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().stream).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().stream).poll_shutdown(cx)
    }
}

/// Factory for [`DirectPool`]
#[derive(Debug, Clone, Default)]
pub struct DirectPoolFactory {
    config: PoolConfig,
}

impl DirectPoolFactory {
    pub fn new(config: PoolConfig) -> Self {
        Self { config }
    }
}

impl PoolFactory for DirectPoolFactory {
    type Session = Session;
    type Pool = DirectPool;

    fn create(&mut self, ctx: PoolContext<Session>) -> DirectPool {
        DirectPool::spawn(ctx, &self.config)
    }
}

/// Pool that turns each connection into its own session
pub struct DirectPool {
    client_id: ClientId,
    generation: u64,
    intake: QueueIn<TcpStream>,
    task: JoinHandle<()>,
}

impl DirectPool {
    /// Start the pool task. Must be called inside a tokio runtime.
    pub fn spawn(ctx: PoolContext<Session>, config: &PoolConfig) -> Self {
        let (intake, connections) = unbounded();
        let client_id = ctx.client_id;
        let generation = ctx.generation;
        let task = tokio::spawn(run_pool(ctx, connections, config.clone()));
        Self {
            client_id,
            generation,
            intake,
            task,
        }
    }

    /// Check if the pool task has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl ConnectionPool for DirectPool {
    fn client_id(&self) -> ClientId {
        self.client_id
    }

    fn generation(&self) -> u64 {
        self.generation
    }

    fn intake(&self) -> &QueueIn<TcpStream> {
        &self.intake
    }

    fn stop(&mut self) {
        // The pool task sees a stopped intake and exits; live sessions are
        // owned by the consumer and keep running until dropped.
        self.intake.stop();
    }
}

impl Drop for DirectPool {
    fn drop(&mut self) {
        self.intake.stop();
    }
}

async fn run_pool(
    ctx: PoolContext<Session>,
    mut connections: QueueOut<TcpStream>,
    config: PoolConfig,
) {
    let live = Arc::new(AtomicUsize::new(0));
    let mut idle_check = interval(config.idle_check_interval().max(Duration::from_millis(1)));
    idle_check.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut busy_at = Instant::now();

    crate::log_pool!(
        tracing::Level::DEBUG,
        client_id = %ctx.client_id,
        generation = ctx.generation,
        "pool started"
    );

    loop {
        tokio::select! {
            conn = connections.recv() => {
                let Some(conn) = conn else {
                    crate::log_pool!(tracing::Level::DEBUG, client_id = %ctx.client_id, "pool intake stopped");
                    break;
                };
                busy_at = Instant::now();
                if !emit_session(&ctx, conn, &live) {
                    break;
                }
            }
            _ = idle_check.tick() => {
                if live.load(Ordering::Acquire) > 0 {
                    busy_at = Instant::now();
                } else if busy_at.elapsed() >= config.idle_timeout() {
                    crate::log_pool!(
                        tracing::Level::INFO,
                        client_id = %ctx.client_id,
                        generation = ctx.generation,
                        "pool idle, signalling stop"
                    );
                    // Close intake first so late routing fails fast. Anything
                    // routed before the close was already counted, so it
                    // still becomes a session.
                    for conn in connections.close() {
                        if !emit_session(&ctx, conn, &live) {
                            break;
                        }
                    }
                    ctx.stop_notify.notify();
                    break;
                }
            }
        }
    }
}

/// Wrap a routed connection and publish it. False once the stream is gone.
fn emit_session(ctx: &PoolContext<Session>, conn: TcpStream, live: &Arc<AtomicUsize>) -> bool {
    let session = Session {
        client_id: ctx.client_id,
        peer_addr: conn.peer_addr().ok(),
        shared_key: Arc::clone(&ctx.shared_key),
        stream: MeteredStream::new(conn, ctx.bytes_read.clone(), ctx.bytes_sent.clone())
            .with_live(LiveGuard::new(Arc::clone(live))),
    };
    if ctx.sessions.send(session).is_err() {
        crate::log_pool!(tracing::Level::DEBUG, client_id = %ctx.client_id, "session stream closed");
        return false;
    }
    true
}
