//! MCP (Model Context Protocol) server.
//!
//! Exposes Azure DevOps tools to an MCP client over stdio. Tools reach the
//! auth subsystem only through the three providers in [`ToolContext`].
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │                  MCP client                      │
//! └─────────────────────────────────────────────────┘
//!                        │ stdio (JSON-RPC)
//!                        ▼
//! ┌─────────────────────────────────────────────────┐
//! │  MCPServer                                       │
//! │  • initialize / notifications/initialized        │
//! │  • tools/list, tools/call                        │
//! │                      │                           │
//! │                  AdoTools                        │
//! │       ┌──────────────┼──────────────┐            │
//! │       ▼              ▼              ▼            │
//! │  token_provider  connection_   user_agent_       │
//! │                  provider      provider          │
//! └─────────────────────────────────────────────────┘
//! ```

mod protocol;
mod server;
mod tools;

pub use protocol::{
    CallToolParams, CallToolResult, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ListToolsResult,
    MCPInitializeParams, MCPInitializeResult, MCPServerCapabilities, MCPServerInfo, MCPTool,
    MCPToolInputSchema, RequestId, ToolContent, PROTOCOL_VERSION,
};
pub use server::{MCPServer, MCPServerError, SERVER_NAME};
pub use tools::{
    AdoTools, ConnectionProvider, ToolContext, TokenProvider, UserAgentProvider, SEARCH_HOST,
};
