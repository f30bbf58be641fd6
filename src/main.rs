// src/main.rs
// Process entrypoint: load config, start the MCP Manager against every
// configured server, bring up tracing, and serve the HTTP API.

use std::sync::Arc;

use anyhow::Result;
use think_orchestrator::api::http::create_router;
use think_orchestrator::api::AppState;
use think_orchestrator::config::Config;
use think_orchestrator::mcp::McpManager;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("[ORCHESTRATOR] starting, {} MCP server(s) configured", config.mcp.servers.len());

    let manager = Arc::new(McpManager::new());
    manager.start_all(config.mcp.servers.clone()).await;

    let state = Arc::new(AppState { config: Arc::new(config.clone()), manager });
    let router = create_router(state);

    let bind_address = config.server.bind_address();
    let listener = TcpListener::bind(&bind_address).await?;
    info!("[ORCHESTRATOR] listening on {}", bind_address);

    axum::serve(listener, router).await?;
    Ok(())
}
