mod bounded_reader;
mod commands;
mod gateway_http;
mod inflight;
mod monitoring;
mod roots_shim;
mod stdio_relay;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::commands::{GATEWAY_HTTP_SERVERS, STDIO_RELAY_SERVERS};
use crate::monitoring::MonitoringConfig;

/// Per-IDE stdio bridge: one child process per MCP server name, speaking
/// JSON-RPC over stdin/stdout to the IDE and either an HTTP gateway or a
/// spawned stdio MCP server on the other side.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Logical MCP server name, e.g. "filesystem-agent" or "json-query".
    server: String,
}

#[tokio::main]
async fn main() {
    // All logging goes to stderr: stdout is the JSON-RPC wire to the IDE.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("relay_bridge=info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let args = Args::parse();

    let code = if GATEWAY_HTTP_SERVERS.contains(&args.server.as_str()) {
        info!(server = %args.server, mode = "gateway-http", "starting bridge");
        gateway_http::run_gateway_http(&args.server).await
    } else if STDIO_RELAY_SERVERS.contains(&args.server.as_str()) {
        info!(server = %args.server, mode = "stdio-relay", "starting bridge");
        let monitoring = match MonitoringConfig::from_env() {
            Some(config) => match monitoring::spawn(config).await {
                Ok(handle) => Some(handle),
                Err(e) => {
                    error!(error = %e, "failed to open monitoring log, continuing without it");
                    None
                }
            },
            None => None,
        };
        stdio_relay::run_stdio_relay(&args.server, monitoring).await
    } else {
        error!(server = %args.server, "unknown MCP server name");
        1
    };

    std::process::exit(code);
}
