//! MCP server over stdio.
//!
//! Messages are newline-delimited JSON-RPC 2.0. Responses are written in
//! request order; notifications get no reply.

use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};

use super::protocol::{
    CallToolParams, JsonRpcError, JsonRpcRequest, JsonRpcResponse, ListToolsResult,
    MCPInitializeParams, MCPInitializeResult, MCPServerCapabilities, MCPServerInfo,
    PROTOCOL_VERSION,
};
use super::tools::{AdoTools, ToolContext};
use crate::useragent::{McpClientInfo, UserAgentComposer};

/// Name reported in the `initialize` response.
pub const SERVER_NAME: &str = "Azure DevOps MCP Server";

/// Error type for the server loop.
#[derive(Debug, thiserror::Error)]
pub enum MCPServerError {
    #[error("I/O error on transport: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// MCP server exposing the Azure DevOps tools.
pub struct MCPServer {
    tools: AdoTools,
    user_agent: Arc<UserAgentComposer>,
    /// Client info from `initialize`, applied once the client confirms
    pending_client: Mutex<Option<McpClientInfo>>,
}

impl MCPServer {
    /// Create a server.
    pub fn new(context: ToolContext, user_agent: Arc<UserAgentComposer>) -> Self {
        Self::with_tools(AdoTools::new(context), user_agent)
    }

    /// Create a server around a prepared tool set.
    pub fn with_tools(tools: AdoTools, user_agent: Arc<UserAgentComposer>) -> Self {
        Self { tools, user_agent, pending_client: Mutex::new(None) }
    }

    /// Serve on the process's stdin and stdout until stdin closes.
    pub async fn serve_stdio(&self) -> Result<(), MCPServerError> {
        let stdin = BufReader::new(tokio::io::stdin());
        let stdout = tokio::io::stdout();
        self.run(stdin, stdout).await
    }

    /// Serve on any line-oriented transport until the reader hits EOF.
    pub async fn run<R, W>(&self, reader: R, mut writer: W) -> Result<(), MCPServerError>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            tracing::debug!("MCP <- {}", line.trim());

            if let Some(response) = self.handle_message(&line).await {
                let json = serde_json::to_string(&response)?;
                tracing::debug!("MCP -> {}", json);
                writer.write_all(json.as_bytes()).await?;
                writer.write_all(b"\n").await?;
                writer.flush().await?;
            }
        }

        tracing::info!("stdin closed, shutting down");
        Ok(())
    }

    /// Handle one raw message. Returns `None` for notifications.
    pub async fn handle_message(&self, raw: &str) -> Option<JsonRpcResponse> {
        let request = match JsonRpcRequest::parse(raw) {
            Ok(request) => request,
            Err(error) => {
                tracing::warn!(error = %error, "rejected message");
                return Some(JsonRpcResponse::failure(None, error));
            }
        };

        if request.is_notification() {
            self.handle_notification(&request);
            return None;
        }

        let id = request.id.clone();
        let outcome = match request.method.as_str() {
            "initialize" => self.initialize(request.params),
            "ping" => Ok(json!({})),
            "tools/list" => self.list_tools(),
            "tools/call" => self.call_tool(request.params).await,
            other => Err(JsonRpcError::new(
                JsonRpcError::METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            )),
        };

        Some(match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(error) => JsonRpcResponse::failure(id, error),
        })
    }

    fn handle_notification(&self, request: &JsonRpcRequest) {
        match request.method.as_str() {
            "notifications/initialized" => {
                let pending = match self.pending_client.lock() {
                    Ok(mut guard) => guard.take(),
                    Err(poisoned) => poisoned.into_inner().take(),
                };
                self.user_agent.append_mcp_client_info(pending);
                tracing::info!(user_agent = %self.user_agent.user_agent(), "client initialized");
            }
            other => tracing::debug!(method = other, "ignoring notification"),
        }
    }

    fn initialize(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: MCPInitializeParams = parse_params(params)?;
        tracing::info!(
            protocol_version = %params.protocol_version,
            client = ?params.client_info.as_ref().map(|c| c.name.as_str()),
            "initialize"
        );

        if let Some(client) = params.client_info {
            match self.pending_client.lock() {
                Ok(mut guard) => *guard = Some(client),
                Err(poisoned) => *poisoned.into_inner() = Some(client),
            }
        }

        let result = MCPInitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: MCPServerCapabilities { tools: Some(json!({})) },
            server_info: MCPServerInfo {
                name: SERVER_NAME.to_string(),
                version: Some(crate::VERSION.to_string()),
            },
        };
        to_value(result)
    }

    fn list_tools(&self) -> Result<Value, JsonRpcError> {
        to_value(ListToolsResult { tools: self.tools.definitions() })
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, JsonRpcError> {
        let params: CallToolParams = parse_params(params)?;
        tracing::info!(tool = %params.name, "tools/call");
        let result = self.tools.call(params).await?;
        to_value(result)
    }
}

fn parse_params<T: serde::de::DeserializeOwned>(params: Option<Value>) -> Result<T, JsonRpcError> {
    let params = params.unwrap_or_else(|| json!({}));
    serde_json::from_value(params).map_err(|e| {
        JsonRpcError::new(JsonRpcError::INVALID_PARAMS, format!("Invalid params: {}", e))
    })
}

fn to_value<T: serde::Serialize>(value: T) -> Result<Value, JsonRpcError> {
    serde_json::to_value(value)
        .map_err(|e| JsonRpcError::new(JsonRpcError::INTERNAL_ERROR, e.to_string()))
}

#[cfg(test)]
mod tests {
    use futures::FutureExt;

    use super::*;
    use crate::auth::{AccessToken, AuthError};
    use crate::client::ClientError;
    use crate::mcp::tools::{ConnectionProvider, TokenProvider, UserAgentProvider};

    fn server() -> (MCPServer, Arc<UserAgentComposer>) {
        let composer = Arc::new(UserAgentComposer::new("1.2.3"));
        let token_provider: TokenProvider =
            Arc::new(|| async { Ok(AccessToken::new("t", 0)) }.boxed());
        let connection_provider: ConnectionProvider = Arc::new(|| {
            async { Err(ClientError::Auth(AuthError::Authentication("no login".into()))) }.boxed()
        });
        let ua = Arc::clone(&composer);
        let user_agent_provider: UserAgentProvider = Arc::new(move || ua.user_agent());
        let context = ToolContext::new(token_provider, connection_provider, user_agent_provider);
        (MCPServer::new(context, Arc::clone(&composer)), composer)
    }

    const INITIALIZE: &str = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2024-11-05","capabilities":{},"clientInfo":{"name":"myclient","version":"0.1"}}}"#;
    const INITIALIZED: &str = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;

    #[tokio::test]
    async fn test_initialize_reports_server() {
        let (server, _) = server();
        let response = server.handle_message(INITIALIZE).await.unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["serverInfo"]["name"], SERVER_NAME);
        assert_eq!(result["protocolVersion"], PROTOCOL_VERSION);
        assert!(result["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn test_client_info_applied_after_initialized() {
        let (server, composer) = server();
        server.handle_message(INITIALIZE).await;
        assert_eq!(composer.user_agent(), "AzureDevOps.MCP/1.2.3");

        assert!(server.handle_message(INITIALIZED).await.is_none());
        assert_eq!(composer.user_agent(), "AzureDevOps.MCP/1.2.3 myclient/0.1");
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let (server, _) = server();
        let response = server
            .handle_message(r#"{"jsonrpc":"2.0","id":"a","method":"resources/list"}"#)
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, JsonRpcError::METHOD_NOT_FOUND);
        assert_eq!(response.id, Some("a".into()));
    }

    #[tokio::test]
    async fn test_malformed_json() {
        let (server, _) = server();
        let response = server.handle_message("{not json").await.unwrap();
        assert_eq!(response.error.unwrap().code, JsonRpcError::PARSE_ERROR);
        assert!(response.id.is_none());
    }

    #[tokio::test]
    async fn test_null_id_gets_invalid_request_reply() {
        let (server, composer) = server();
        server.handle_message(INITIALIZE).await;

        let response = server
            .handle_message(r#"{"jsonrpc":"2.0","id":null,"method":"notifications/initialized"}"#)
            .await
            .unwrap();
        assert_eq!(response.error.unwrap().code, JsonRpcError::INVALID_REQUEST);
        assert!(response.id.is_none());
        assert_eq!(composer.user_agent(), "AzureDevOps.MCP/1.2.3");

        let json = serde_json::to_value(
            server.handle_message(r#"{"jsonrpc":"2.0","id":null,"method":"ping"}"#).await.unwrap(),
        )
        .unwrap();
        assert!(json["id"].is_null());
        assert_eq!(json["error"]["code"], JsonRpcError::INVALID_REQUEST);
    }

    #[tokio::test]
    async fn test_tool_auth_failure_is_tool_error() {
        let (server, _) = server();
        let response = server
            .handle_message(
                r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"core_list_projects","arguments":{}}}"#,
            )
            .await
            .unwrap();
        let result = response.result.unwrap();
        assert_eq!(result["isError"], true);
        assert!(result["content"][0]["text"].as_str().unwrap().contains("no login"));
    }

    #[tokio::test]
    async fn test_run_over_buffers() {
        let (server, _) = server();
        let input = format!(
            "{}\n{}\n\n{}\n",
            INITIALIZE, INITIALIZED, r#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#
        );
        let mut output = Vec::new();
        server.run(input.as_bytes(), &mut output).await.unwrap();

        let lines: Vec<Value> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], 1);
        assert_eq!(lines[1]["id"], 3);
        assert_eq!(lines[1]["result"]["tools"].as_array().unwrap().len(), 4);
    }
}
