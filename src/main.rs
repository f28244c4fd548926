//! rcon-server - Hardened Source-engine RCON server
//!
//! This binary provides a standalone RCON server that:
//! - Authenticates connections against a salted SHA-256 credential record
//! - Dispatches commands to the built-in dispatcher (echo by default)
//! - Bounds frames, buffers, writes, and concurrent connections

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use zeroize::Zeroizing;

use rcon_server::{config, CommandDispatcher, PasswordRecord, RconServer, Result};

#[derive(Parser)]
#[command(name = "rcon-server")]
#[command(version)]
#[command(about = "Hardened Source-engine RCON server")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override listen host
    #[arg(long)]
    host: Option<String>,

    /// Override listen port
    #[arg(long)]
    port: Option<u16>,

    /// Hash a password into a credential record for the config file, then exit
    #[arg(long, value_name = "PASSWORD")]
    hash_password: Option<String>,

    /// Enable verbose/debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Some(password) = cli.hash_password {
        let password = Zeroizing::new(password);
        let record = PasswordRecord::generate(&password);
        println!("Credential record: {}", record.encode());
        println!("Add this to your config file:");
        println!("  credential: \"{}\"", record.encode());
        return Ok(());
    }

    // Load configuration first so the configured logging level (and its
    // RCON_LOG_LEVEL override) can feed the filter.
    let mut config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => {
            let mut config = config::Config::default();
            config::apply_env_overrides(&mut config);
            config
        }
    };

    // Apply CLI overrides
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }

    // Initialize logging
    // Priority: --verbose flag, then RUST_LOG env var, then the config level
    let log_level = if cli.verbose {
        "debug".to_string()
    } else {
        std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone())
    };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&log_level))
        .init();

    info!("Starting rcon-server v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &cli.config {
        info!("Loaded configuration from {:?}", path);
    }

    let executor = Arc::new(CommandDispatcher::new());
    let mut server = RconServer::new(config, executor)?;
    let addr = server.start().await?;
    info!("RCON server ready on {}", addr);

    // Wait for shutdown signal
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = async {
            #[cfg(unix)]
            {
                let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
                    .expect("Failed to install SIGTERM handler");
                sigterm.recv().await;
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    server.stop().await;
    Ok(())
}
