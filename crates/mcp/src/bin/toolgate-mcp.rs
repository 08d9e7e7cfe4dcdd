// Standalone MCP server binary (stdio transport)

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use toolgate_core::catalog::build_dispatcher;
use toolgate_core::GatewayConfig;
use toolgate_mcp::McpServer;

#[derive(Parser, Debug)]
#[command(name = "toolgate-mcp")]
#[command(about = "Toolgate MCP server over stdio", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "toolgate.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // stdout carries protocol frames, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "toolgate=info,toolgate_core=info,toolgate_mcp=info".into()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    tracing::info!("Toolgate MCP server starting...");

    let config = GatewayConfig::load(&args.config)?;
    let dispatcher = Arc::new(build_dispatcher(&config)?);

    let server = McpServer::new(dispatcher, &config.server);
    server.start().await?;

    Ok(())
}
