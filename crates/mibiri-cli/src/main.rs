//! Mibiri CLI: key generation, registration, sending and reading messages.

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mibiri_cli::flows::{self, ListenConfig};
use mibiri_cli::RelayClient;
use mibiri_common::helpers::ServerAddr;
use mibiri_crypto::profile::PROFILE_DIR_ENV;
use mibiri_crypto::{default_profile_dir, Profile};
use tokio::sync::oneshot;
use tracing::warn;

#[derive(Parser, Debug)]
#[command(name = "mibiri")]
#[command(about = "Mibiri end-to-end encrypted messaging client")]
struct Args {
    /// Directory holding profile files
    #[arg(long, global = true, env = PROFILE_DIR_ENV)]
    profile_dir: Option<PathBuf>,

    /// Seconds to wait for the relay on each request
    #[arg(long, global = true, default_value_t = 10)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a keypair and save it as a local profile
    Keygen {
        #[arg(short, long)]
        username: String,
    },

    /// Publish the profile's public key to a relay
    Register {
        /// Relay address (host:port)
        #[arg(short, long)]
        server: String,

        #[arg(short, long)]
        username: String,
    },

    /// Encrypt a message and hand it to the relay
    Send {
        /// Relay address (host:port)
        #[arg(short, long)]
        server: String,

        /// Sending profile
        #[arg(short, long)]
        from: String,

        #[arg(short, long)]
        to: String,

        #[arg(short, long)]
        message: String,
    },

    /// Fetch and decrypt queued messages once
    Inbox {
        /// Relay address (host:port)
        #[arg(short, long)]
        server: String,

        #[arg(short, long)]
        username: String,
    },

    /// Poll for messages until interrupted
    Listen {
        /// Relay address (host:port)
        #[arg(short, long)]
        server: String,

        #[arg(short, long)]
        username: String,

        /// Seconds between polls
        #[arg(short, long, default_value_t = 2)]
        interval: u64,
    },

    /// Check that a relay answers
    Ping {
        /// Relay address (host:port)
        #[arg(short, long)]
        server: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<()> {
    mibiri_common::init_tracing_with_default("warn");

    let args = Args::parse();
    let request_timeout = Duration::from_secs(args.timeout);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match args.command {
        Command::Keygen { username } => {
            let dir = profile_dir(args.profile_dir)?;
            let profile = Profile::generate(&username)?;
            let path = profile.save(&dir)?;

            println!("Profile:     {}", path.display());
            println!("Public key:  {}", profile.keypair.public_key());
            println!("Fingerprint: {}", profile.keypair.public_key().fingerprint());
        }
        Command::Register { server, username } => {
            let profile = load_profile(args.profile_dir, &username)?;
            let addr = ServerAddr::parse(&server)?;

            rt.block_on(async {
                let mut client = RelayClient::connect(&addr, request_timeout).await?;
                flows::register(&mut client, &profile).await
            })?;

            println!("Registered {} on {}", username, addr);
        }
        Command::Send {
            server,
            from,
            to,
            message,
        } => {
            let profile = load_profile(args.profile_dir, &from)?;
            let addr = ServerAddr::parse(&server)?;

            rt.block_on(async {
                let mut client = RelayClient::connect(&addr, request_timeout).await?;
                flows::send(&mut client, &profile, &to, &message)
                    .await
                    .map_err(anyhow::Error::from)
            })?;

            println!("Sent to {}", to);
        }
        Command::Inbox { server, username } => {
            let profile = load_profile(args.profile_dir, &username)?;
            let addr = ServerAddr::parse(&server)?;

            let entries = rt.block_on(async {
                let mut client = RelayClient::connect(&addr, request_timeout).await?;
                flows::inbox(&mut client, &profile).await
            })?;

            if entries.is_empty() {
                println!("No messages");
            }
            for entry in entries {
                println!("{}", entry);
            }
        }
        Command::Listen {
            server,
            username,
            interval,
        } => {
            let profile = load_profile(args.profile_dir, &username)?;
            let addr = ServerAddr::parse(&server)?;
            let config = ListenConfig {
                interval: Duration::from_secs(interval),
                request_timeout,
            };

            println!("Listening for {} on {} (Ctrl-C to stop)", username, addr);

            rt.block_on(async {
                let (shutdown_tx, shutdown_rx) = oneshot::channel();
                tokio::spawn(async move {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        warn!("Failed to listen for Ctrl-C: {}", e);
                        std::future::pending::<()>().await;
                    }
                    let _ = shutdown_tx.send(());
                });

                flows::listen(&addr, &profile, config, shutdown_rx, |entry| {
                    println!("{}", entry)
                })
                .await
            })?;
        }
        Command::Ping { server } => {
            let addr = ServerAddr::parse(&server)?;
            println!("Pinging {}...", addr);

            let rtt = rt.block_on(async {
                let mut client = RelayClient::connect(&addr, request_timeout).await?;
                flows::ping(&mut client).await
            })?;

            println!("Pong received in {:?}", rtt);
        }
        Command::Version => {
            println!("mibiri {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

fn profile_dir(flag: Option<PathBuf>) -> Result<PathBuf> {
    match flag {
        Some(dir) => Ok(dir),
        None => Ok(default_profile_dir()?),
    }
}

fn load_profile(flag: Option<PathBuf>, username: &str) -> Result<Profile> {
    let dir = profile_dir(flag)?;
    Profile::load(&dir, username)
        .with_context(|| format!("loading profile {:?}", username))
}
