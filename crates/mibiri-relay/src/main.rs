#![forbid(unsafe_code)]

//! Mibiri Relay - store-and-forward server for encrypted messages.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use mibiri_common::helpers::env_bool;
use mibiri_relay::server::{DEFAULT_IDLE_TIMEOUT_SECS, DEFAULT_LISTEN, DEFAULT_MAX_LINE_BYTES};
use mibiri_relay::store::DEFAULT_MAX_MAILBOX_LEN;
use mibiri_relay::{Relay, RelayConfig};
use tokio::sync::oneshot;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "mibiri-relay")]
#[command(about = "Mibiri relay - stores encrypted messages until their recipients drain them")]
struct Args {
    /// TCP listen address
    #[arg(long, default_value = DEFAULT_LISTEN)]
    listen: SocketAddr,

    /// Seconds to wait for the next request line before dropping a connection
    #[arg(long, default_value_t = DEFAULT_IDLE_TIMEOUT_SECS)]
    idle_timeout: u64,

    /// Maximum request line length in bytes
    #[arg(long, default_value_t = DEFAULT_MAX_LINE_BYTES)]
    max_line_bytes: usize,

    /// Maximum queued messages per user (0 = unlimited)
    #[arg(long, default_value_t = DEFAULT_MAX_MAILBOX_LEN)]
    max_mailbox: usize,

    /// Refuse messages whose sender key differs from the sender's registered key
    #[arg(long, default_value_t = false)]
    strict_sender: bool,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if !args.listen.ip().is_loopback() && !env_bool("MIBIRI_RELAY_ALLOW_PUBLIC_BIND", false) {
        return Err(anyhow::anyhow!(
            "refusing non-loopback relay bind without MIBIRI_RELAY_ALLOW_PUBLIC_BIND=1"
        ));
    }

    mibiri_common::init_tracing_with_default(&args.log_level);

    info!("Starting mibiri-relay v{}", env!("CARGO_PKG_VERSION"));

    let config = RelayConfig {
        listen: args.listen,
        idle_timeout: Duration::from_secs(args.idle_timeout),
        max_line_bytes: args.max_line_bytes,
        max_mailbox_len: args.max_mailbox,
        strict_sender: args.strict_sender,
    };

    let relay = Relay::bind(&config).await?;

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            // Keep the sender alive so the relay does not stop on its own
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
        let _ = shutdown_tx.send(());
    });

    relay.run(shutdown_rx).await?;
    info!("Relay stopped; all queued messages discarded");
    Ok(())
}
