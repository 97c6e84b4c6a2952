//! Connection pool contract
//!
//! A pool owns every physical connection for one client id and turns them
//! into sessions. The coordinator only creates pools, feeds them connections
//! and stops them. Multiplexing, the shared secret and teardown all happen
//! behind these traits.
//!
//! # Design Notes
//! - A pool is fully wired at construction through [`PoolContext`]; nothing is
//!   assigned after the coordinator can route to it.
//! - Generics, not trait objects: the coordinator is monomorphized over its
//!   [`PoolFactory`].

pub mod direct;

pub use direct::{DirectPool, DirectPoolFactory, MeteredStream, Session};

use crate::core::ClientId;
use crate::infrastructure::queue::QueueIn;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;

/// Stop notification sent by a pool that can no longer operate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStopped {
    pub client_id: ClientId,
    /// Generation of the pool that stopped; stale generations are ignored
    pub generation: u64,
}

/// One-shot stop signal handed to a pool
#[derive(Debug)]
pub struct StopNotifier {
    client_id: ClientId,
    generation: u64,
    sink: QueueIn<PoolStopped>,
    fired: AtomicBool,
}

impl StopNotifier {
    pub fn new(client_id: ClientId, generation: u64, sink: QueueIn<PoolStopped>) -> Self {
        Self {
            client_id,
            generation,
            sink,
            fired: AtomicBool::new(false),
        }
    }

    /// Tell the coordinator this pool stopped
    ///
    /// Only the first call sends anything. Returns true if this call sent the
    /// notification.
    pub fn notify(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.sink
            .send(PoolStopped {
                client_id: self.client_id,
                generation: self.generation,
            })
            .is_ok()
    }

    #[inline]
    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

/// Everything a new pool is wired to
pub struct PoolContext<S> {
    pub client_id: ClientId,
    pub generation: u64,
    pub shared_key: Arc<str>,
    /// Sessions emitted here surface on the server's public stream
    pub sessions: QueueIn<S>,
    pub stop_notify: StopNotifier,
    /// Byte-count deltas read from clients
    pub bytes_read: QueueIn<u64>,
    /// Byte-count deltas sent to clients
    pub bytes_sent: QueueIn<u64>,
}

/// Pool as seen by the coordinator
pub trait ConnectionPool: Send + 'static {
    /// Client id this pool serves
    fn client_id(&self) -> ClientId;

    /// Generation assigned at creation
    fn generation(&self) -> u64;

    /// Intake for freshly identified connections. Sends never block.
    fn intake(&self) -> &QueueIn<TcpStream>;

    /// Tear the pool down. Called at most once, from the coordinator.
    fn stop(&mut self);
}

/// Builds pools on first sighting of a client id
pub trait PoolFactory: Send + 'static {
    /// Unit emitted on the public session stream
    type Session: Send + 'static;
    type Pool: ConnectionPool;

    fn create(&mut self, ctx: PoolContext<Self::Session>) -> Self::Pool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::queue::unbounded;

    #[test]
    fn test_stop_notifier_fires_once() {
        let (tx, mut rx) = unbounded();
        let notifier = StopNotifier::new(ClientId(3), 9, tx);

        assert!(!notifier.has_fired());
        assert!(notifier.notify());
        assert!(!notifier.notify());
        assert!(notifier.has_fired());

        assert_eq!(
            rx.try_recv(),
            Some(PoolStopped {
                client_id: ClientId(3),
                generation: 9
            })
        );
        assert_eq!(rx.try_recv(), None);
    }

    #[test]
    fn test_stop_notifier_after_coordinator_gone() {
        let (tx, rx) = unbounded();
        drop(rx);
        let notifier = StopNotifier::new(ClientId(1), 0, tx);
        assert!(!notifier.notify());
        assert!(notifier.has_fired());
    }
}
