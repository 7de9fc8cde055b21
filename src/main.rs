//! parksim - interactive parking-lot simulation over WebSocket
//!
//! This binary serves the simulation endpoint. Each WebSocket connection
//! gets its own session, driven by the client's control messages.

use anyhow::{Context, Result};
use clap::Parser;
use parksim::Config;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "parksim")]
#[command(about = "Interactive parking-lot simulation over WebSocket")]
struct Args {
    /// Path to configuration file (defaults apply when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(short, long)]
    address: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("parksim=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!("Starting parksim");

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .await
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };

    // Override address if specified
    if let Some(address) = args.address {
        config.address = address;
    }

    // Validate configuration (warns about misconfigurations)
    config.validate();

    info!(
        address = %config.address,
        metrics_port = config.metrics_port,
        idle_timeout_secs = config.idle_timeout_secs,
        "Configuration loaded"
    );

    let metrics_port = config.metrics_port;
    let (app, metrics_router) = parksim::build_app(config.clone());

    // Spawn metrics server if enabled
    if let Some(metrics_router) = metrics_router {
        let metrics_addr = format!("0.0.0.0:{}", metrics_port);
        let metrics_listener = TcpListener::bind(&metrics_addr)
            .await
            .with_context(|| format!("Failed to bind metrics to {}", metrics_addr))?;
        info!(addr = %metrics_addr, "Serving metrics");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(metrics_listener, metrics_router).await {
                tracing::error!(error = %e, "Metrics server error");
            }
        });
    }

    // Start server
    let listener = TcpListener::bind(&config.address)
        .await
        .with_context(|| format!("Failed to bind to {}", config.address))?;

    info!(addr = %config.address, "Listening for simulation clients");

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
