//! Centralized file-based logging system
//!
//! Writes logs to files under the configured directory, separated by log type:
//! - main/ - All events (JSON)
//! - error/ - Error and warning logs only
//! - accept/ - Accept loop logs
//! - coordinator/ - Routing, pool table and heartbeat logs
//! - pool/ - Pool lifecycle logs

use crate::infrastructure::config::LoggingConfig;
use crate::MuxError;
use std::fs;
use std::path::Path;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

/// Log types that get their own subdirectory
pub const LOG_TYPES: [&str; 5] = ["main", "error", "accept", "coordinator", "pool"];

/// Initialize centralized file logging
///
/// Creates the log directory tree and sets up file appenders for each log type.
/// Returns WorkerGuards which must be kept alive for the duration of the program.
pub fn init_logging(config: &LoggingConfig) -> Result<Vec<WorkerGuard>, MuxError> {
    prepare_log_dirs(&config.directory)?;

    let mut guards = Vec::new();
    let mut appender = |name: &str| {
        let (writer, guard) = create_appender(&config.directory.join(name), name);
        guards.push(guard);
        writer
    };

    // Main log - all logs
    let main_layer = tracing_subscriber::fmt::layer()
        .with_writer(appender("main"))
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .json();

    // Error log - ERROR and WARN only
    let error_layer = tracing_subscriber::fmt::layer()
        .with_writer(appender("error"))
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(tracing_subscriber::filter::LevelFilter::WARN);

    let accept_layer = tracing_subscriber::fmt::layer()
        .with_writer(appender("accept"))
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            metadata.target().contains("accept")
        }));

    let coordinator_layer = tracing_subscriber::fmt::layer()
        .with_writer(appender("coordinator"))
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            metadata.target().contains("coordinator") || metadata.target().contains("server")
        }));

    let pool_layer = tracing_subscriber::fmt::layer()
        .with_writer(appender("pool"))
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            metadata.target().contains("pool")
        }));

    // Console layer for development
    let console_layer = config.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_level(true)
    });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    tracing_subscriber::registry()
        .with(filter)
        .with(main_layer)
        .with(error_layer)
        .with(accept_layer)
        .with(coordinator_layer)
        .with(pool_layer)
        .with(console_layer)
        .try_init()
        .map_err(|e| MuxError::Logging(e.to_string()))?;

    tracing::info!(
        "Logging system initialized. Log files in {}",
        config.directory.display()
    );

    Ok(guards)
}

/// Create the log directory and one subdirectory per log type
pub fn prepare_log_dirs(root: &Path) -> Result<(), MuxError> {
    for log_type in LOG_TYPES {
        let dir = root.join(log_type);
        fs::create_dir_all(&dir).map_err(|e| {
            MuxError::Logging(format!("failed to create {}: {}", dir.display(), e))
        })?;
    }
    Ok(())
}

/// Create a rolling file appender
fn create_appender(dir: &Path, name: &str) -> (NonBlocking, WorkerGuard) {
    let appender = RollingFileAppender::new(Rotation::DAILY, dir, name);

    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    (non_blocking, guard)
}

/// Log macro helpers for specific log types
#[macro_export]
macro_rules! log_accept {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "accept", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_coordinator {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "coordinator", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_pool {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "pool", $level, $($arg)+)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directory_creation() {
        let test_dir = std::env::temp_dir().join(format!("connmux_logs_{}", std::process::id()));
        if test_dir.exists() {
            fs::remove_dir_all(&test_dir).ok();
        }

        prepare_log_dirs(&test_dir).unwrap();
        for log_type in LOG_TYPES {
            assert!(test_dir.join(log_type).is_dir());
        }

        // idempotent
        prepare_log_dirs(&test_dir).unwrap();

        fs::remove_dir_all(&test_dir).ok();
    }
}
