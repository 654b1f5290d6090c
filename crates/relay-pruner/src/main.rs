mod cache;
mod deepinfra;
mod heuristic;
mod reconstruct;
mod server;
mod store;
mod types;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use axum::routing::{get, post};
use clap::Parser;
use relay_core::config::RelayConfig;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::server::{PrunerState, get_health, post_rpc};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Host to bind the pruner server to; overrides the config file and env var.
    #[arg(long)]
    host: Option<String>,
    /// Port to bind the pruner server to; overrides the config file and env var.
    #[arg(long)]
    port: Option<u16>,
    /// Path to the relay TOML config file.
    #[arg(long, default_value = "./relay.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("relay_pruner=info,tower_http=info"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let args = Args::parse();
    let mut config = RelayConfig::load(&args.config)?;
    if let Some(host) = args.host {
        config.mcp_pruner.host = host;
    }
    if let Some(port) = args.port {
        config.mcp_pruner.port = port;
    }

    info!(
        host = %config.mcp_pruner.host,
        port = config.mcp_pruner.port,
        backend = ?config.mcp_pruner.backend,
        max_input_chars = config.mcp_pruner.max_input_chars,
        "starting mcp pruner server"
    );

    let addr: SocketAddr = format!("{}:{}", config.mcp_pruner.host, config.mcp_pruner.port).parse()?;
    let state = Arc::new(PrunerState::new(config.mcp_pruner));

    let app = Router::new()
        .route("/rpc", post(post_rpc))
        .route("/health", get(get_health))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "mcp pruner server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
