//! Single-use shutdown latch
//!
//! Replaces a raw "closed" flag plus channel close: triggering twice is a
//! no-op, and any number of tasks can wait on it or poll it.

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable one-shot shutdown signal
#[derive(Debug, Clone)]
pub struct ShutdownLatch {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownLatch {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the latch
    ///
    /// Returns true only for the call that actually fired it.
    pub fn trigger(&self) -> bool {
        self.tx.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        })
    }

    /// Check if the latch has fired
    #[inline]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until the latch fires. Returns immediately if it already has.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl Default for ShutdownLatch {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_trigger_is_idempotent() {
        let latch = ShutdownLatch::new();
        assert!(!latch.is_triggered());

        assert!(latch.trigger());
        assert!(!latch.trigger());
        assert!(!latch.clone().trigger());
        assert!(latch.is_triggered());
    }

    #[tokio::test]
    async fn test_waiters_wake_on_trigger() {
        let latch = ShutdownLatch::new();
        let waiter = {
            let latch = latch.clone();
            tokio::spawn(async move { latch.triggered().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        latch.trigger();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_late_waiter_returns_immediately() {
        let latch = ShutdownLatch::new();
        latch.trigger();
        tokio::time::timeout(Duration::from_millis(50), latch.triggered())
            .await
            .unwrap();
    }
}
