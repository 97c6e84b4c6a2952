//! Unbounded non-blocking queue adapter
//!
//! Bridges asynchronous producers (accept loop, pools, sessions) to a single
//! consumer without ever making a producer wait. Items land in a lock-free
//! segment queue and the consumer is woken through a `Notify` permit.
//!
//! There is no capacity bound: memory grows with the rate mismatch between
//! producers and the consumer. That is accepted in exchange for producers
//! that never stall.
//!
//! # Example
//! ```
//! use connmux::infrastructure::queue;
//!
//! # tokio_test::block_on(async {
//! let (tx, mut rx) = queue::unbounded::<u64>();
//! tx.send(42).unwrap();
//! assert_eq!(rx.recv().await, Some(42));
//!
//! tx.stop();
//! assert_eq!(rx.recv().await, None);
//! # });
//! ```

use crossbeam_queue::SegQueue;
use std::fmt;
use std::hint;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Low bit of `Shared::state`: the queue is stopped
const STOPPED: usize = 1;
/// One in-flight `send`, counted in the remaining bits
const SENDER: usize = 2;

struct Shared<T> {
    items: SegQueue<T>,
    notify: Notify,
    /// Stop flag plus the number of sends currently pushing
    state: AtomicUsize,
}

impl<T> Shared<T> {
    #[inline]
    fn is_stopped(&self) -> bool {
        self.state.load(Ordering::Acquire) & STOPPED != 0
    }

    /// Set the stop flag and wait out sends that got in before it
    ///
    /// Returns true for the call that set the flag. Once this returns no
    /// further item can land in `items`.
    fn close(&self) -> bool {
        let prev = self.state.fetch_or(STOPPED, Ordering::AcqRel);
        while self.state.load(Ordering::Acquire) & !STOPPED != 0 {
            hint::spin_loop();
        }
        prev & STOPPED == 0
    }

    fn stop(&self) {
        if !self.close() {
            return;
        }
        // Release whatever is still buffered
        while self.items.pop().is_some() {}
        self.notify.notify_one();
    }
}

/// Create a queue adapter and return its inbound and outbound sides
pub fn unbounded<T>() -> (QueueIn<T>, QueueOut<T>) {
    let shared = Arc::new(Shared {
        items: SegQueue::new(),
        notify: Notify::new(),
        state: AtomicUsize::new(0),
    });
    (
        QueueIn {
            shared: Arc::clone(&shared),
        },
        QueueOut { shared },
    )
}

/// Inbound side. Clone it freely, any number of producers may send.
pub struct QueueIn<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for QueueIn<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> QueueIn<T> {
    /// Push an item without waiting
    ///
    /// The item is handed back inside the error if the queue was stopped.
    #[inline]
    pub fn send(&self, item: T) -> Result<(), QueueStopped<T>> {
        let prev = self.shared.state.fetch_add(SENDER, Ordering::AcqRel);
        if prev & STOPPED != 0 {
            self.shared.state.fetch_sub(SENDER, Ordering::AcqRel);
            return Err(QueueStopped(item));
        }
        // A concurrent stop waits for this push before draining
        self.shared.items.push(item);
        self.shared.state.fetch_sub(SENDER, Ordering::AcqRel);
        self.shared.notify.notify_one();
        Ok(())
    }

    /// Stop the queue, drop buffered items and wake the consumer
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Check if the queue was stopped from either side
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }
}

impl<T> fmt::Debug for QueueIn<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueIn")
            .field("buffered", &self.shared.items.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Outbound side, drained by exactly one consumer.
///
/// Dropping it stops the queue so producers learn the consumer is gone.
pub struct QueueOut<T> {
    shared: Arc<Shared<T>>,
}

impl<T> QueueOut<T> {
    /// Wait for the next item
    ///
    /// Returns `None` once the queue is stopped. Cancel safe: an item is only
    /// taken off the queue when this future completes.
    pub async fn recv(&mut self) -> Option<T> {
        loop {
            if self.shared.is_stopped() {
                return None;
            }
            if let Some(item) = self.shared.items.pop() {
                return Some(item);
            }
            self.shared.notify.notified().await;
        }
    }

    /// Take the next item if one is buffered
    #[inline]
    pub fn try_recv(&mut self) -> Option<T> {
        if self.shared.is_stopped() {
            return None;
        }
        self.shared.items.pop()
    }

    /// Stop the queue and take everything producers managed to send
    ///
    /// Every item whose `send` returned `Ok` is either already received or
    /// in the returned vector. Empty if the queue had already been stopped.
    pub fn close(&mut self) -> Vec<T> {
        if !self.shared.close() {
            return Vec::new();
        }
        let rest = std::iter::from_fn(|| self.shared.items.pop()).collect();
        self.shared.notify.notify_one();
        rest
    }

    /// Number of buffered items
    #[inline]
    pub fn len(&self) -> usize {
        self.shared.items.len()
    }

    /// Check if nothing is buffered
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.shared.items.is_empty()
    }

    /// Stop the queue from the consumer side
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Check if the queue was stopped from either side
    #[inline]
    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }
}

impl<T> Drop for QueueOut<T> {
    fn drop(&mut self) {
        self.shared.stop();
    }
}

impl<T> fmt::Debug for QueueOut<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueOut")
            .field("buffered", &self.len())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

/// Error returned by [`QueueIn::send`] after the queue was stopped
pub struct QueueStopped<T>(pub T);

impl<T> QueueStopped<T> {
    /// Recover the rejected item
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for QueueStopped<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("QueueStopped(..)")
    }
}

impl<T> fmt::Display for QueueStopped<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("queue adapter stopped")
    }
}

impl<T> std::error::Error for QueueStopped<T> {}
