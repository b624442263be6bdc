//! @acp:module "MCP Server"
//! @acp:summary "Model Context Protocol server for Malloy Publisher access"
//! @acp:domain mcp
//! @acp:layer transport
//!
//! Provides MCP server capabilities for AI agents like Claude Desktop.
//! Exposes Malloy query execution as a tool, project/package/model metadata
//! as resources and a query-writing prompt.

pub mod resources;
mod service;
pub mod tools;

pub use service::MalloyMcpService;

use rmcp::ServiceExt;
use tokio::io::{stdin, stdout};
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::publisher::Connector;
use crate::state::AppState;

/// Run the MCP server over stdio
pub async fn run_stdio_server(
    config: ServerConfig,
    connector: &dyn Connector,
) -> anyhow::Result<()> {
    info!("Starting MCP server over stdio");

    let state = AppState::new(config);

    let result = serve(&state, connector).await;

    // Release the publisher session on every exit path
    state.shutdown().await;

    result
}

async fn serve(state: &AppState, connector: &dyn Connector) -> anyhow::Result<()> {
    let connected = state.connect(connector).await.map_err(|e| {
        error!("{}", e.render());
        anyhow::anyhow!(e.render())
    })?;

    info!(
        "Publisher session ready after {} attempt(s)",
        connected.attempts
    );

    let default_project = &state.config().default_project;
    if !connected.projects.iter().any(|p| &p.name == default_project) {
        let available: Vec<&str> = connected.projects.iter().map(|p| p.name.as_str()).collect();
        warn!(
            "Default project '{}' not found on publisher (available: {})",
            default_project,
            available.join(", ")
        );
    }

    // Create MCP service
    let service = MalloyMcpService::new(state.clone())?;

    // Create stdio transport
    let transport = (stdin(), stdout());

    // Serve MCP protocol
    info!("MCP server ready, waiting for requests...");
    match service.serve(transport).await {
        Ok(server) => {
            server.waiting().await?;
            info!("MCP server shutdown");
        }
        Err(e) => {
            error!("MCP server error: {}", e);
            return Err(e.into());
        }
    }

    Ok(())
}
