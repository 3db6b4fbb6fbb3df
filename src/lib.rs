//! # Azure DevOps MCP
//!
//! Model Context Protocol server exposing Azure DevOps to MCP clients.
//!
//! This crate holds the credential and client bootstrap: every tool call
//! resolves a fresh Entra ID token and builds a new Azure DevOps connection
//! that carries the server's user agent.
//!
//! ## Features
//!
//! - **On-behalf-of**: Exchange a caller's user assertion for a delegated token
//! - **Credential chain**: Azure CLI pinned to a tenant, then ambient credentials
//! - **User agent**: Server version plus the connecting MCP client
//! - **stdio transport**: Line-delimited JSON-RPC, diagnostics on stderr
//!
//! ## Quick Start
//!
//! ```bash
//! # Log in once
//! az login
//!
//! # Serve an organization
//! mcp-server-azuredevops contoso
//!
//! # Pin the tenant
//! mcp-server-azuredevops contoso --tenant 00000000-0000-0000-0000-000000000000
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
// Allow common patterns that are intentional in this codebase
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::return_self_not_must_use)]
#![allow(clippy::option_if_let_else)]
#![allow(clippy::significant_drop_tightening)]
#![allow(clippy::missing_fields_in_debug)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::use_self)]

pub mod auth;
pub use auth::{
    AccessToken, AuthConfig, AuthError, AuthMode, AuthResult, CredentialProvider, TokenBroker,
    TokenCredential, AZURE_DEVOPS_SCOPE,
};

pub mod client;
pub use client::{
    org_url, AdoConnection, ApiSurface, ClientError, ClientFactory, ClientResult, ConnectionMode,
};

pub mod mcp;
pub use mcp::{MCPServer, MCPServerError, ToolContext};

pub mod useragent;
pub use useragent::{McpClientInfo, UserAgentComposer, PRODUCT_NAME};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Binary name
pub const APP_NAME: &str = "mcp-server-azuredevops";
