//! sync-relay command line: host a relay or join one.

use std::io::Write;
use std::sync::{Arc, Weak};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::io::AsyncBufReadExt;

use sync_relay::{Connection, Envelope, Relay, RelayConfig};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Routing key used by the built-in chat.
const CHAT_ROUTE: &str = "chat";

// CLI
#[derive(Parser)]
#[command(name = "sync-relay")]
#[command(version = VERSION)]
#[command(about = "Host/peer message relay over TCP")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Host a relay and rebroadcast chat messages to every peer
    Host {
        /// Port to listen on (defaults to the configured port)
        #[arg(long)]
        port: Option<u16>,
    },
    /// Join a host; stdin lines are sent as chat messages
    Join {
        /// Host address: ip, ip:port, host or host:port
        address: String,
    },
    /// Print the effective configuration
    Config {
        /// Write the effective configuration back to the config file
        #[arg(long)]
        save: bool,
    },
}

fn init_logging() -> Result<()> {
    let builder_env = env_logger::Env::default().default_filter_or("info");
    let mut builder = env_logger::Builder::from_env(builder_env);
    if let Ok(path) = std::env::var("SYNC_RELAY_LOG_FILE") {
        let log_file = std::fs::File::create(&path)
            .with_context(|| format!("Failed to create log file at {path}"))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.format_timestamp_secs().init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();
    let config = RelayConfig::load()?;

    match cli.command {
        Commands::Host { port } => run_host(config, port).await,
        Commands::Join { address } => run_join(config, &address).await,
        Commands::Config { save } => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            if save {
                config.save()?;
            }
            Ok(())
        }
    }
}

async fn run_host(mut config: RelayConfig, port: Option<u16>) -> Result<()> {
    if let Some(port) = port {
        config.port = port;
    }
    let relay = Arc::new(Relay::new(config));

    // Weak: the handler is stored inside the relay it refers to.
    let weak: Weak<Relay> = Arc::downgrade(&relay);
    relay.register_host_route(
        CHAT_ROUTE,
        Arc::new(move |conn: &Connection, env: Envelope| -> anyhow::Result<()> {
            log::info!("[Chat] {} ({}): {}", conn.remote_addr(), env.author_id(), env.payload());
            if let Some(relay) = weak.upgrade() {
                relay.queue_broadcast(env);
            }
            Ok(())
        }),
    );

    if let Err(e) = relay.start_host() {
        log::error!("[Host] {e}");
        return Err(e.into());
    }
    relay.spawn_drain_loop();
    if let Some(addr) = relay.host().local_addr() {
        println!("Hosting on {addr} (Ctrl-C to stop)");
    }

    tokio::signal::ctrl_c().await?;
    relay.shutdown().await;
    Ok(())
}

async fn run_join(config: RelayConfig, address: &str) -> Result<()> {
    let relay = Arc::new(Relay::new(config));
    let me = relay.author_id();
    relay.register_peer_route(
        CHAT_ROUTE,
        Arc::new(move |_conn: &Connection, env: Envelope| -> anyhow::Result<()> {
            if env.author_id() != me {
                println!("[{}] {}", env.author_id(), env.payload());
                std::io::stdout().flush()?;
            }
            Ok(())
        }),
    );

    let remote = match relay.connect(address).await {
        Ok(remote) => remote,
        Err(e) => {
            log::error!("[Peer] {e}");
            return Err(e.into());
        }
    };
    relay.spawn_drain_loop();
    println!("Connected to {remote}. Type to chat, Ctrl-D or Ctrl-C to leave.");

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line? {
                Some(line) if !line.trim().is_empty() => {
                    if !relay.is_peer() {
                        println!("Host closed the connection");
                        break;
                    }
                    relay.queue_send(relay.envelope(CHAT_ROUTE, line));
                }
                Some(_) => {}
                None => break,
            },
        }
    }

    relay.drain_once();
    relay.shutdown().await;
    Ok(())
}
