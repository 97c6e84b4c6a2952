//! Infrastructure - cold path only
//!
//! This module contains code that sits beside the routing logic:
//! - Logging and metrics
//! - Configuration management
//! - The unbounded queue adapter every component communicates through

pub mod config;
pub mod logging;
pub mod metrics;
pub mod queue;

pub use metrics::{MetricsSnapshot, ServerMetrics};
pub use queue::{unbounded, QueueIn, QueueOut, QueueStopped};
