//! Metrics collection for system monitoring
//!
//! Lock-free counters using atomic operations. Every counter has a single
//! writer (the coordinator, or the accept loop for accept counters), so
//! plain loads and adds are enough. Anyone may take a snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Server metrics collector
pub struct ServerMetrics {
    /// Bytes read from clients, as reported by pools
    bytes_read: AtomicU64,
    /// Bytes sent to clients, as reported by pools
    bytes_sent: AtomicU64,
    /// Pools currently in the coordinator table
    live_pools: AtomicU64,
    /// Pools ever created
    pools_created: AtomicU64,
    /// Pools removed (self-stopped or stopped at shutdown)
    pools_stopped: AtomicU64,
    /// Sockets returned by accept
    connections_accepted: AtomicU64,
    /// Connections forwarded into a pool
    connections_routed: AtomicU64,
    /// Connections dropped for a bad or missing client header
    headers_rejected: AtomicU64,
    /// Failed accept calls outside shutdown
    accept_errors: AtomicU64,
    /// Coordinator heartbeat ticks
    heartbeats: AtomicU64,
    /// Start time for uptime calculation
    start_time: Instant,
}

/// Metrics snapshot for export
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub bytes_read: u64,
    pub bytes_sent: u64,
    pub live_pools: u64,
    pub pools_created: u64,
    pub pools_stopped: u64,
    pub connections_accepted: u64,
    pub connections_routed: u64,
    pub headers_rejected: u64,
    pub accept_errors: u64,
    pub heartbeats: u64,
    pub read_rate: f64, // bytes per second
    pub send_rate: f64, // bytes per second
    pub uptime_seconds: u64,
}

impl ServerMetrics {
    /// Create new metrics collector
    pub fn new() -> Self {
        Self {
            bytes_read: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            live_pools: AtomicU64::new(0),
            pools_created: AtomicU64::new(0),
            pools_stopped: AtomicU64::new(0),
            connections_accepted: AtomicU64::new(0),
            connections_routed: AtomicU64::new(0),
            headers_rejected: AtomicU64::new(0),
            accept_errors: AtomicU64::new(0),
            heartbeats: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    #[inline]
    pub fn add_bytes_read(&self, delta: u64) {
        self.bytes_read.fetch_add(delta, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_bytes_sent(&self, delta: u64) {
        self.bytes_sent.fetch_add(delta, Ordering::Relaxed);
    }

    /// Record a new pool; `live` is the table size after insertion
    pub fn record_pool_created(&self, live: usize) {
        self.pools_created.fetch_add(1, Ordering::Relaxed);
        self.live_pools.store(live as u64, Ordering::Relaxed);
    }

    /// Record a removed pool; `live` is the table size after removal
    pub fn record_pool_stopped(&self, live: usize) {
        self.pools_stopped.fetch_add(1, Ordering::Relaxed);
        self.live_pools.store(live as u64, Ordering::Relaxed);
    }

    /// Record pools stopped by the shutdown finalizer; the table is empty after
    pub fn record_pools_drained(&self, count: usize) {
        self.pools_stopped.fetch_add(count as u64, Ordering::Relaxed);
        self.live_pools.store(0, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_accept(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_accept_error(&self) {
        self.accept_errors.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_routed(&self) {
        self.connections_routed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_header_rejected(&self) {
        self.headers_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_heartbeat(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn live_pools(&self) -> u64 {
        self.live_pools.load(Ordering::Relaxed)
    }

    /// Get current snapshot of metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let bytes_read = self.bytes_read();
        let bytes_sent = self.bytes_sent();

        let uptime = self.start_time.elapsed().as_secs();
        let (read_rate, send_rate) = if uptime > 0 {
            (bytes_read as f64 / uptime as f64, bytes_sent as f64 / uptime as f64)
        } else {
            (0.0, 0.0)
        };

        MetricsSnapshot {
            bytes_read,
            bytes_sent,
            live_pools: self.live_pools(),
            pools_created: self.pools_created.load(Ordering::Relaxed),
            pools_stopped: self.pools_stopped.load(Ordering::Relaxed),
            connections_accepted: self.connections_accepted.load(Ordering::Relaxed),
            connections_routed: self.connections_routed.load(Ordering::Relaxed),
            headers_rejected: self.headers_rejected.load(Ordering::Relaxed),
            accept_errors: self.accept_errors.load(Ordering::Relaxed),
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            read_rate,
            send_rate,
            uptime_seconds: uptime,
        }
    }
}

impl Default for ServerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = ServerMetrics::new();
        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.bytes_read, 0);
        assert_eq!(snapshot.bytes_sent, 0);
        assert_eq!(snapshot.live_pools, 0);
        assert_eq!(snapshot.read_rate, 0.0);
    }

    #[test]
    fn test_pool_gauge_follows_table_size() {
        let metrics = ServerMetrics::new();

        metrics.record_pool_created(1);
        metrics.record_pool_created(2);
        metrics.record_pool_stopped(1);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.pools_created, 2);
        assert_eq!(snapshot.pools_stopped, 1);
        assert_eq!(snapshot.live_pools, 1);

        metrics.record_pools_drained(1);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.pools_stopped, 2);
        assert_eq!(snapshot.live_pools, 0);
    }

    #[test]
    fn test_connection_counters() {
        let metrics = ServerMetrics::new();

        metrics.record_accept();
        metrics.record_accept();
        metrics.record_routed();
        metrics.record_header_rejected();
        metrics.record_accept_error();
        metrics.record_heartbeat();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_accepted, 2);
        assert_eq!(snapshot.connections_routed, 1);
        assert_eq!(snapshot.headers_rejected, 1);
        assert_eq!(snapshot.accept_errors, 1);
        assert_eq!(snapshot.heartbeats, 1);
    }

    proptest! {
        #[test]
        fn prop_byte_totals_are_sums_and_monotonic(
            reads in proptest::collection::vec(0u64..1 << 32, 0..64),
            sends in proptest::collection::vec(0u64..1 << 32, 0..64),
        ) {
            let metrics = ServerMetrics::new();
            let mut last = 0;
            for &delta in &reads {
                metrics.add_bytes_read(delta);
                let now = metrics.bytes_read();
                prop_assert!(now >= last);
                last = now;
            }
            for &delta in &sends {
                metrics.add_bytes_sent(delta);
            }

            prop_assert_eq!(metrics.bytes_read(), reads.iter().sum::<u64>());
            prop_assert_eq!(metrics.bytes_sent(), sends.iter().sum::<u64>());
        }
    }
}
