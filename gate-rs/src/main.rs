//! gate-rs: HTTP Reverse Proxy Server
//!
//! Reads the route table from `CONFIG_PATH` (default `config.json`) and
//! listens on `PORT` (default 8080).

use anyhow::Context;
use gate_rs::{ProxyServer, RouteTable, ServerConfig};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    init_logging();

    if let Err(e) = run().await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let config = ServerConfig::from_env().context("Invalid environment")?;

    let routes = RouteTable::load(&config.config_path)
        .with_context(|| format!("Failed to create proxy server from {}", config.config_path.display()))?;

    info!(
        "gate-rs v{} starting on port {}",
        env!("CARGO_PKG_VERSION"),
        config.listen_addr.port()
    );
    info!("Loaded {} routes:", routes.len());
    for route in routes.routes() {
        info!("  - /{} -> {}", route.path, route.target);
    }
    if let Some(timeout) = config.upstream_timeout {
        info!("Upstream timeout: {}s", timeout.as_secs());
    }

    let server = ProxyServer::new(config, routes);
    server.run().await.context("Server failed")?;

    Ok(())
}

/// Text logs by default; `LOG_FORMAT=json` switches to JSON lines
fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "gate_rs=info,tower_http=info".into());

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}
