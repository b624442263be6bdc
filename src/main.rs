#![forbid(unsafe_code)]

//! @acp:module "Malloy MCP Server Entry Point"
//! @acp:summary "Main entry point for the Malloy MCP server"
//! @acp:domain mcp
//! @acp:layer application
//!
//! The Malloy MCP server provides Model Context Protocol access to a Malloy
//! Publisher. It exposes query execution as an MCP tool, project, package and
//! model metadata as MCP resources, and a query-writing prompt for Claude
//! Desktop and other MCP-compatible AI agents.

use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod bootstrap;
mod config;
mod error;
mod mcp;
mod prompt;
mod publisher;
mod state;

use bootstrap::RetryPolicy;
use config::{ServerConfig, DEFAULT_PROJECT, DEFAULT_PUBLISHER_URL};
use publisher::HttpConnector;

/// Malloy MCP Server - Model Context Protocol for Malloy Publisher
#[derive(Parser, Debug)]
#[command(name = "malloy-mcp")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Base URL of the Malloy Publisher service
    #[arg(long, env = "MALLOY_PUBLISHER_ROOT_URL", default_value = DEFAULT_PUBLISHER_URL)]
    publisher_url: String,

    /// Project used when a request does not name one
    #[arg(long, env = "MALLOY_PROJECT", default_value = DEFAULT_PROJECT)]
    project: String,

    /// Connection attempts at startup before giving up
    #[arg(long, env = "MALLOY_CONNECT_ATTEMPTS", default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(1..))]
    connect_attempts: u32,

    /// Delay before the first connection retry, doubled after each failure
    #[arg(long, env = "MALLOY_RETRY_DELAY_MS", default_value_t = 1000)]
    retry_delay_ms: u64,

    /// Upper bound on any single publisher request
    #[arg(long, env = "MALLOY_REQUEST_TIMEOUT_SECS", default_value_t = 30,
          value_parser = clap::value_parser!(u64).range(1..))]
    request_timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            publisher_url: self.publisher_url.clone(),
            default_project: self.project.clone(),
            retry: RetryPolicy::new(
                self.connect_attempts,
                Duration::from_millis(self.retry_delay_ms),
            ),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging (to stderr so stdout is free for MCP)
    init_logging(&cli.log_level);

    let config = cli.server_config();

    info!("Malloy MCP Server v{} starting", env!("CARGO_PKG_VERSION"));
    info!("Publisher: {}", config.display_url());

    let connector = HttpConnector::new(config.request_timeout);

    // Run MCP server over stdio
    mcp::run_stdio_server(config, &connector).await
}

fn init_logging(level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
