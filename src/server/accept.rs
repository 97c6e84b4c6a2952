//! Accept loop
//!
//! Owns the listening socket. Every accepted connection is pushed into the
//! coordinator's intake without waiting. Accept errors are retried with
//! exponential backoff unless shutdown is in progress, in which case the
//! loop ends and the listener is dropped (closed).

use crate::infrastructure::metrics::ServerMetrics;
use crate::infrastructure::queue::QueueIn;
use crate::server::shutdown::ShutdownLatch;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tracing::Level;

/// Retry delay for failed accepts
#[derive(Debug, Clone)]
pub struct AcceptBackoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl AcceptBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: initial,
        }
    }

    /// Calculate next retry delay with exponential backoff
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        // Exponential backoff: double the delay, cap at max
        self.current = std::cmp::min(self.current.saturating_mul(2), self.max);
        delay
    }

    /// Reset after a successful accept
    pub fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// Everything the accept loop runs with
pub(crate) struct AcceptLoop {
    pub listener: TcpListener,
    pub intake: QueueIn<TcpStream>,
    pub shutdown: ShutdownLatch,
    pub backoff: AcceptBackoff,
    pub metrics: Arc<ServerMetrics>,
    pub tcp_nodelay: bool,
}

impl AcceptLoop {
    pub async fn run(mut self) {
        crate::log_accept!(Level::DEBUG, "accept loop started");

        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.triggered() => break,
                res = self.listener.accept() => res,
            };

            match accepted {
                Ok((stream, peer)) => {
                    self.backoff.reset();
                    self.metrics.record_accept();
                    if self.tcp_nodelay {
                        if let Err(e) = stream.set_nodelay(true) {
                            crate::log_accept!(Level::DEBUG, %peer, "set_nodelay failed: {}", e);
                        }
                    }
                    crate::log_accept!(Level::TRACE, %peer, "accepted connection");
                    if self.intake.send(stream).is_err() {
                        // Coordinator released its intake; nothing will consume
                        crate::log_accept!(Level::DEBUG, "intake stopped, leaving accept loop");
                        break;
                    }
                }
                Err(e) => {
                    if self.shutdown.is_triggered() {
                        break;
                    }
                    self.metrics.record_accept_error();
                    let delay = self.backoff.next_delay();
                    crate::log_accept!(Level::WARN, ?delay, "accept failed: {}", e);
                    tokio::select! {
                        _ = self.shutdown.triggered() => break,
                        _ = sleep(delay) => {}
                    }
                }
            }
        }

        crate::log_accept!(Level::DEBUG, "accept loop stopped, closing listener");
    }
}
