//! RelayKV server entry point.
//!
//! Binds the RESP listener, connects the JetStream-backed storage pool
//! and serves until Ctrl+C.

use anyhow::Result;
use clap::Parser;
use relaykv::{Config, Server};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// A Redis-compatible gateway that stores its data in NATS JetStream.
#[derive(Debug, Parser)]
#[command(name = "relaykv", version)]
struct Cli {
    /// Path to a TOML configuration file. Options not set there fall back
    /// to RELAYKV_* environment variables, then to defaults.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    info!(
        nats = %config.nats.url,
        databases = config.server.num_databases,
        persist = config.nats.persist,
        "starting RelayKV"
    );

    let server = Server::new(config);

    tokio::select! {
        result = server.start() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received, stopping server");
            server.stop();
        }
    }

    info!("server shutdown complete");
    Ok(())
}
