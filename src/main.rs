//! Azure DevOps MCP server.
//!
//! Serves Azure DevOps tools to an MCP client over stdio. Logs go to stderr.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use azure_devops_mcp::{
    org_url, AuthConfig, AuthMode, ClientFactory, MCPServer, TokenBroker, ToolContext,
    UserAgentComposer, VERSION,
};

/// Azure DevOps MCP server
#[derive(Parser)]
#[command(name = "mcp-server-azuredevops")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Azure DevOps organization name
    #[arg(env = "ADO_ORG")]
    organization: Option<String>,

    /// Entra ID tenant used by the Azure CLI credential
    #[arg(short, long)]
    tenant: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    let Some(organization) = cli.organization.filter(|o| !o.trim().is_empty()) else {
        tracing::error!("organization is required (positional argument or ADO_ORG)");
        anyhow::bail!("Azure DevOps organization is required");
    };

    let config = AuthConfig::from_env(cli.tenant);
    if config.mode == AuthMode::OnBehalfOf {
        if let Err(e) = config.obo.validate() {
            tracing::warn!(error = %e, "on-behalf-of configuration is incomplete");
        }
    }

    let org_url = org_url(&organization);
    tracing::info!(
        organization = %organization,
        org_url = %org_url,
        auth_mode = %config.mode,
        version = VERSION,
        "starting Azure DevOps MCP server"
    );

    let broker = Arc::new(TokenBroker::new(config));
    let user_agent = Arc::new(UserAgentComposer::new(VERSION));
    let factory = ClientFactory::new(Arc::clone(&broker), Arc::clone(&user_agent), org_url);
    let context = ToolContext::from_components(broker, factory, Arc::clone(&user_agent));

    let server = MCPServer::new(context, user_agent);
    if let Err(e) = server.serve_stdio().await {
        tracing::error!(error = %e, "transport failed");
        return Err(e).context("MCP stdio transport failed");
    }

    Ok(())
}
