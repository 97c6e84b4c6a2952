//! TCP session multiplexer
//!
//! Accepts raw TCP connections, reads an 8-byte client id from each, and
//! routes it to the connection pool owned by that client. Pools turn
//! connections into sessions, which surface on one public stream.
//!
//! # Architecture
//! - **core**: Client id header codec
//! - **pool**: Pool contract and the direct reference pool
//! - **server**: Accept loop, coordinator and the `Server` facade
//! - **infrastructure**: Cold path (queue adapter, logging, metrics, config)

pub mod core;
pub mod infrastructure;
pub mod pool;
pub mod server;

#[cfg(test)]
pub mod test_utils;

// Re-export commonly used types
pub use crate::core::{ClientId, HeaderError};
pub use infrastructure::config::{Config, ConfigError, LoggingConfig, PoolConfig, ServerConfig};
pub use infrastructure::metrics::MetricsSnapshot;
pub use pool::{ConnectionPool, DirectPoolFactory, PoolContext, PoolFactory, Session};
pub use server::{DrainReport, Server, ShutdownLatch};

use thiserror::Error;

/// Main error type for the multiplexer
#[derive(Error, Debug)]
pub enum MuxError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging error: {0}")]
    Logging(String),

    #[error("Background task failed: {0}")]
    Task(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, MuxError>;
