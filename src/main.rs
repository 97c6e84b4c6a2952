//! TCP session multiplexer daemon
//!
//! # Architecture
//! - **core**: Client id header codec
//! - **pool**: Pool contract and direct pool
//! - **server**: Accept loop, coordinator, facade
//! - **infrastructure**: Cold path (logging, metrics, config)
//!
//! Sessions are echoed back to the client; swap in a real consumer by
//! replacing `serve_session`.

use anyhow::Context;
use connmux::infrastructure::logging::init_logging;
use connmux::{Config, DirectPoolFactory, Server, Session};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};

const STATS_INTERVAL: Duration = Duration::from_secs(30);

async fn serve_session(session: Session) {
    let client_id = session.client_id();
    let (mut reader, mut writer) = tokio::io::split(session);
    match tokio::io::copy(&mut reader, &mut writer).await {
        Ok(n) => tracing::debug!(%client_id, bytes = n, "session closed"),
        Err(e) => tracing::debug!(%client_id, "session ended: {}", e),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load config or use defaults
    let config = Config::load().context("loading config")?;

    let _guards = init_logging(&config.logging).context("initializing logging")?;

    config.validate().context("validating config")?;
    if config.server.shared_key.is_empty() {
        tracing::warn!("shared key is empty; set it in config or via the environment");
    }

    let mut server = Server::bind_with(&config.server, DirectPoolFactory::new(config.pool.clone()))
        .await
        .context("starting server")?;
    tracing::info!(addr = %server.local_addr(), "connmux started");

    let mut stats = interval(STATS_INTERVAL);
    stats.set_missed_tick_behavior(MissedTickBehavior::Delay);
    stats.tick().await;

    loop {
        tokio::select! {
            session = server.next_session() => {
                let Some(session) = session else { break };
                tokio::spawn(serve_session(session));
            }
            _ = stats.tick() => {
                let m = server.metrics();
                tracing::info!(
                    live_pools = m.live_pools,
                    pools_created = m.pools_created,
                    accepted = m.connections_accepted,
                    rejected = m.headers_rejected,
                    bytes_read = m.bytes_read,
                    bytes_sent = m.bytes_sent,
                    read_rate = m.read_rate,
                    send_rate = m.send_rate,
                    "stats"
                );
            }
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    tracing::error!("failed to listen for ctrl-c: {}", e);
                }
                break;
            }
        }
    }

    tracing::info!("shutting down");
    let report = server.shutdown().await?;
    tracing::info!(
        pools_stopped = report.pools_stopped,
        heartbeats = report.heartbeats,
        "connmux stopped"
    );

    Ok(())
}
