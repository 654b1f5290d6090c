mod cline;
mod gateway;
mod handlers;
mod metrics;
mod pipeline;
mod state;
mod upstream;
mod usage;
mod ws;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use axum::routing::{get, post};
use clap::Parser;
use relay_core::config::RelayConfig;
use relay_core::pruner_client::PrunerClient;
use relay_core::sanitizer::CircuitBreakerConfig;
use relay_core::session::SessionManager;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::gateway::{GatewayRoute, GatewayTable, McpGateway};
use crate::metrics::InMemoryMetricsStore;
use crate::state::AppState;
use crate::upstream::UpstreamClient;

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Address to bind the service to; overrides the config file and env var.
    #[arg(long)]
    addr: Option<String>,
    /// Path to the relay TOML config file.
    #[arg(long, default_value = "./relay.toml")]
    config: PathBuf,
    /// Optional bearer token required on inbound requests.
    #[arg(long)]
    auth_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("relay_service=info,tower_http=info"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let args = Args::parse();
    let mut config = RelayConfig::load(&args.config)?;
    if let Some(addr) = args.addr {
        config.server.addr = addr;
    }
    if let Some(auth_key) = args.auth_key {
        config.server.auth_key = Some(auth_key);
    }

    info!(
        addr = %config.server.addr,
        auth = %config.server.auth_key.as_ref().map(|_| "enabled").unwrap_or("disabled"),
        providers = config.routes.providers().count(),
        "starting relay service"
    );

    let mut gateway_routes = GatewayTable::new();
    for name in ["context-compression", "sequential-thinking", "fast-filesystem", "json-query"] {
        gateway_routes.insert(
            name,
            GatewayRoute {
                base_url: format!("http://127.0.0.1:8801/mcp/{name}"),
            },
        );
    }

    let addr = config.server.addr.clone();
    let hub = Arc::new(ws::WsHub::new());
    let cline_watermark = Arc::new(AtomicU64::new(0));

    if let Ok(ledger_path) = std::env::var("RELAY_CLINE_LEDGER_PATH") {
        let hub = hub.clone();
        let watermark = cline_watermark.clone();
        tokio::spawn(async move {
            let path = PathBuf::from(&ledger_path);
            let Ok(canonical) = std::fs::canonicalize(&path) else {
                tracing::warn!(path = %ledger_path, "cline ledger path does not exist, polling disabled");
                return;
            };
            cline::poll_cline_ledger(&hub, &path, &canonical, &watermark, Duration::from_secs(30)).await;
        });
    }

    let state = AppState {
        sessions: Arc::new(SessionManager::new()),
        metrics: Arc::new(InMemoryMetricsStore::new()),
        hub,
        upstream: Arc::new(UpstreamClient::new()),
        pruner_client: Arc::new(PrunerClient::new(config.pruner_client.clone())),
        gateway: Arc::new(McpGateway::new(gateway_routes, Duration::from_secs(10))),
        sanitizer_breaker: CircuitBreakerConfig::default(),
        cline_watermark,
        config: Arc::new(config),
    };

    let app = Router::new()
        .route("/chat/completions", post(pipeline::chat_completions))
        .route("/health", get(handlers::health))
        .route("/models", get(handlers::list_models_openai))
        .route("/api/models", get(handlers::list_models_dashboard))
        .route("/api/providers", get(handlers::list_providers))
        .route("/api/mcp-gateway/:server/rpc", post(handlers::mcp_gateway_rpc))
        .route("/api/sessions", get(handlers::list_sessions).post(handlers::create_session))
        .route("/api/sessions/active", get(handlers::active_session))
        .route("/ws", get(handlers::ws_upgrade))
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
