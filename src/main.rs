// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Rendezvous relay server binary.
//!
//! # Usage
//!
//! ```bash
//! # Start on the default port (9000)
//! rendezvous-relay
//!
//! # Custom bind address/port and a config file
//! rendezvous-relay --port 9100 --config server.json
//! ```

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use rendezvous_relay::{RelayServer, ServerConfig};

/// Rendezvous and relay server for NAT traversal between peers sharing a session code.
#[derive(Parser, Debug)]
#[command(name = "rendezvous-relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "9000")]
    port: u16,

    /// Bind address (0.0.0.0 for all interfaces)
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    /// Configuration file (JSON format); overrides --bind/--port when given
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds without a heartbeat before a peer is evicted
    #[arg(long, default_value = "90")]
    stale_after: u64,

    /// Cadence, in seconds, of the staleness sweep
    #[arg(long, default_value = "60")]
    janitor_interval: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = match args.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let config = if let Some(config_path) = args.config {
        info!("loading config from {:?}", config_path);
        ServerConfig::from_file(&config_path)?
    } else {
        ServerConfig {
            bind_address: args.bind.parse()?,
            port: args.port,
            stale_after_secs: args.stale_after,
            janitor_interval_secs: args.janitor_interval,
            ..Default::default()
        }
    };

    config.validate()?;

    let addr: SocketAddr = format!("{}:{}", config.bind_address, config.port).parse()?;

    info!("+----------------------------------------------------+");
    info!(
        "|       rendezvous-relay v{}                     |",
        env!("CARGO_PKG_VERSION")
    );
    info!("+----------------------------------------------------+");
    info!("|  Bind:             {:32} |", addr);
    info!(
        "|  Stale after:      {:32} |",
        format!("{}s", config.stale_after_secs)
    );
    info!(
        "|  Janitor interval: {:32} |",
        format!("{}s", config.janitor_interval_secs)
    );
    info!("+----------------------------------------------------+");

    let server = RelayServer::new(config)?;

    let server_handle = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown signal received, stopping server...");
        server_handle.shutdown().await;
    });

    server.run().await?;

    info!("relay server stopped");
    Ok(())
}
