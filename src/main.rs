//! mcp-bridge - Streamable HTTP gateway for stdio MCP servers
//!
//! Spawns one Model Context Protocol server as a child process and exposes
//! it to remote clients over a single HTTP endpoint serving JSON batch
//! responses and Server-Sent Events streams. Many concurrent client
//! sessions are multiplexed across the one child; the gateway terminates
//! when the child does.

use clap::Parser;
use mcp_bridge::config::{self, GatewayConfig, ResponseMode};
use mcp_bridge::{child, signals, Error, Gateway, Result};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser)]
#[command(name = "mcp-bridge")]
#[command(about = "Streamable HTTP gateway for stdio MCP servers", long_about = None)]
#[command(version)]
struct Cli {
    /// Shell command that starts the MCP server child process
    #[arg(long, env = "MCP_BRIDGE_STDIO")]
    stdio: Option<String>,

    /// Path to configuration file (YAML)
    #[arg(short, long, env = "MCP_BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Host to bind
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(long)]
    port: Option<u16>,

    /// Endpoint path serving the MCP protocol
    #[arg(long)]
    endpoint: Option<String>,

    /// Name of the session id header
    #[arg(long)]
    session_header: Option<String>,

    /// Response strategy for id-bearing POSTs
    #[arg(long, value_enum)]
    response_mode: Option<ResponseMode>,

    /// Milliseconds to wait for a child reply before timing out
    #[arg(long)]
    batch_timeout: Option<u64>,

    /// Health check path returning 200 `ok` (repeatable)
    #[arg(long = "health-endpoint")]
    health_endpoints: Vec<String>,

    /// Static response header as "Name: Value" (repeatable)
    #[arg(long = "header")]
    headers: Vec<String>,

    /// CORS origin (`*` mirrors the request origin)
    #[arg(long)]
    cors_origin: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "MCP_BRIDGE_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(&cli.log_level)?;

    info!("mcp-bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = build_config(&cli)?;
    config.validate()?;

    let (handle, events) = child::spawn(&config.command)?;
    let child::ChildEvents { lines, exit } = events;

    let addr = format!("{}:{}", config.host, config.port)
        .parse::<std::net::SocketAddr>()
        .map_err(|e| Error::Config(format!("Invalid address: {}", e)))?;

    let gateway = Gateway::new(config, handle, lines);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| Error::Server(format!("Failed to bind: {}", e)))?;

    println!("Gateway listening on http://{}", addr);

    // Setup signal handlers for graceful shutdown
    let (_shutdown_tx, mut shutdown_rx) = signals::shutdown_channel();
    let server = tokio::spawn(gateway.run(listener, async move {
        let _ = shutdown_rx.recv().await;
        info!("Shutting down gateway gracefully...");
    }));

    // The gateway has no useful state without its child: when the child
    // exits, terminate with its exit code so the orchestrator sees the
    // crash.
    tokio::select! {
        result = server => {
            result.map_err(|e| Error::Server(format!("Server task failed: {e}")))??;
            info!("Gateway stopped");
        }
        code = exit => {
            let code = code.unwrap_or(1);
            eprintln!("Child process exited; terminating gateway (exit code {code})");
            std::process::exit(code);
        }
    }

    Ok(())
}

fn build_config(cli: &Cli) -> Result<GatewayConfig> {
    let mut config = match &cli.config {
        Some(path) => GatewayConfig::from_file(path)?,
        None => GatewayConfig::default(),
    };

    if let Some(stdio) = &cli.stdio {
        config.command = stdio.clone();
    }
    if let Some(host) = &cli.host {
        config.host = host.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(endpoint) = &cli.endpoint {
        config.endpoint = endpoint.clone();
    }
    if let Some(header) = &cli.session_header {
        config.session_header = header.clone();
    }
    if let Some(mode) = cli.response_mode {
        config.response_mode = mode;
    }
    if let Some(timeout) = cli.batch_timeout {
        config.batch_timeout_ms = timeout;
    }
    config
        .health_endpoints
        .extend(cli.health_endpoints.iter().cloned());
    if !cli.headers.is_empty() {
        config
            .static_headers
            .extend(config::parse_header_pairs(&cli.headers)?);
    }
    if let Some(origin) = &cli.cors_origin {
        config.cors_origin = origin.clone();
    }

    Ok(config)
}

fn init_tracing(log_level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();

    Ok(())
}
