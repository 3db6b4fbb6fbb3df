//! Azure DevOps tools and the context they run with.
//!
//! Tools never hold credentials. Each call asks the [`ToolContext`] for a
//! fresh connection or token, so an expired token is fixed by the next call.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::{json, Value};

use super::protocol::{CallToolParams, CallToolResult, JsonRpcError, MCPTool, MCPToolInputSchema};
use crate::auth::{AccessToken, AuthResult, TokenBroker};
use crate::client::{AdoConnection, ClientFactory, ClientResult};
use crate::useragent::UserAgentComposer;

/// Default host of the Azure DevOps search service.
pub const SEARCH_HOST: &str = "https://almsearch.dev.azure.com";

/// Zero-argument token resolver.
pub type TokenProvider = Arc<dyn Fn() -> BoxFuture<'static, AuthResult<AccessToken>> + Send + Sync>;

/// Zero-argument authenticated connection factory.
pub type ConnectionProvider =
    Arc<dyn Fn() -> BoxFuture<'static, ClientResult<AdoConnection>> + Send + Sync>;

/// Zero-argument current user agent getter.
pub type UserAgentProvider = Arc<dyn Fn() -> String + Send + Sync>;

/// Everything the tool layer receives from the auth subsystem.
#[derive(Clone)]
pub struct ToolContext {
    pub token_provider: TokenProvider,
    pub connection_provider: ConnectionProvider,
    pub user_agent_provider: UserAgentProvider,
}

impl ToolContext {
    /// Bundle three providers.
    pub fn new(
        token_provider: TokenProvider,
        connection_provider: ConnectionProvider,
        user_agent_provider: UserAgentProvider,
    ) -> Self {
        Self { token_provider, connection_provider, user_agent_provider }
    }

    /// Wire providers to a broker, a factory and a user agent composer.
    pub fn from_components(
        broker: Arc<TokenBroker>,
        factory: ClientFactory,
        user_agent: Arc<UserAgentComposer>,
    ) -> Self {
        let token_provider: TokenProvider = Arc::new(move || {
            let broker = Arc::clone(&broker);
            async move { broker.resolve_token().await }.boxed()
        });
        let connection_provider: ConnectionProvider = Arc::new(move || {
            let factory = factory.clone();
            async move { factory.build_client().await }.boxed()
        });
        let user_agent_provider: UserAgentProvider = Arc::new(move || user_agent.user_agent());

        Self::new(token_provider, connection_provider, user_agent_provider)
    }
}

/// Registry of the Azure DevOps tools.
pub struct AdoTools {
    context: ToolContext,
    search_host: String,
}

impl AdoTools {
    /// Create the tool set.
    pub fn new(context: ToolContext) -> Self {
        Self { context, search_host: SEARCH_HOST.to_string() }
    }

    /// Point search tools at a different host.
    pub fn with_search_host(mut self, host: impl Into<String>) -> Self {
        self.search_host = host.into();
        self
    }

    /// Tool definitions advertised by `tools/list`.
    pub fn definitions(&self) -> Vec<MCPTool> {
        vec![
            tool(
                "core_list_projects",
                "List the projects in the Azure DevOps organization.",
                &[
                    ("top", "integer", "Maximum number of projects to return."),
                    ("skip", "integer", "Number of projects to skip."),
                ],
                &[],
            ),
            tool(
                "core_list_project_teams",
                "List the teams of an Azure DevOps project.",
                &[("project", "string", "Project name or id.")],
                &["project"],
            ),
            tool(
                "wit_get_work_item",
                "Get a work item by id, including all fields.",
                &[("id", "integer", "Work item id.")],
                &["id"],
            ),
            tool(
                "search_workitem",
                "Search work items across the organization by text.",
                &[
                    ("searchText", "string", "Text to search for."),
                    ("top", "integer", "Maximum number of results (default 10)."),
                    ("skip", "integer", "Number of results to skip."),
                ],
                &["searchText"],
            ),
        ]
    }

    /// Whether a tool with this name exists.
    pub fn has(&self, name: &str) -> bool {
        self.definitions().iter().any(|t| t.name == name)
    }

    /// Run a tool.
    ///
    /// Unknown tools are a protocol error; any failure inside a tool becomes
    /// an error result so the session keeps going.
    pub async fn call(&self, params: CallToolParams) -> Result<CallToolResult, JsonRpcError> {
        let args = params.arguments.unwrap_or_default();
        let outcome = match params.name.as_str() {
            "core_list_projects" => self.list_projects(&args).await,
            "core_list_project_teams" => self.list_project_teams(&args).await,
            "wit_get_work_item" => self.get_work_item(&args).await,
            "search_workitem" => self.search_work_items(&args).await,
            other => {
                return Err(JsonRpcError::new(
                    JsonRpcError::INVALID_PARAMS,
                    format!("Unknown tool: {}", other),
                ));
            }
        };

        Ok(match outcome {
            Ok(value) => CallToolResult::text(
                serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string()),
            ),
            Err(message) => {
                tracing::warn!(tool = %params.name, error = %message, "tool call failed");
                CallToolResult::error(message)
            }
        })
    }

    async fn connection(&self) -> Result<AdoConnection, String> {
        (self.context.connection_provider)().await.map_err(|e| e.to_string())
    }

    async fn list_projects(&self, args: &HashMap<String, Value>) -> Result<Value, String> {
        let top = optional_u32(args, "top")?;
        let skip = optional_u32(args, "skip")?;
        let connection = self.connection().await?;
        let projects = connection.list_projects(top, skip).await.map_err(|e| e.to_string())?;
        serde_json::to_value(projects).map_err(|e| e.to_string())
    }

    async fn list_project_teams(&self, args: &HashMap<String, Value>) -> Result<Value, String> {
        let project = required_str(args, "project")?;
        let connection = self.connection().await?;
        let teams = connection.list_project_teams(project).await.map_err(|e| e.to_string())?;
        serde_json::to_value(teams).map_err(|e| e.to_string())
    }

    async fn get_work_item(&self, args: &HashMap<String, Value>) -> Result<Value, String> {
        let id = args
            .get("id")
            .and_then(Value::as_u64)
            .ok_or_else(|| "Missing or invalid argument: id".to_string())?;
        let connection = self.connection().await?;
        let item = connection.get_work_item(id).await.map_err(|e| e.to_string())?;
        serde_json::to_value(item).map_err(|e| e.to_string())
    }

    /// Search lives on a separate host; the request reuses the connection's
    /// authorization and user agent, so one call resolves one token.
    async fn search_work_items(&self, args: &HashMap<String, Value>) -> Result<Value, String> {
        let search_text = required_str(args, "searchText")?;
        let top = optional_u32(args, "top")?.unwrap_or(10);
        let skip = optional_u32(args, "skip")?.unwrap_or(0);

        let connection = self.connection().await?;
        let url = format!(
            "{}/{}/_apis/search/workitemsearchresults",
            self.search_host.trim_end_matches('/'),
            connection.org_name()
        );
        let body = json!({
            "searchText": search_text,
            "$top": top,
            "$skip": skip,
            "includeFacets": false,
        });

        connection
            .post_json(&url, &body)
            .await
            .map_err(|e| format!("Work item search failed: {}", e))
    }
}

fn tool(name: &str, description: &str, props: &[(&str, &str, &str)], required: &[&str]) -> MCPTool {
    let properties = props
        .iter()
        .map(|(prop, kind, desc)| ((*prop).to_string(), json!({ "type": kind, "description": desc })))
        .collect::<HashMap<_, _>>();

    MCPTool {
        name: name.to_string(),
        description: Some(description.to_string()),
        input_schema: MCPToolInputSchema {
            schema_type: "object".to_string(),
            properties: Some(properties),
            required: (!required.is_empty())
                .then(|| required.iter().map(|r| (*r).to_string()).collect()),
        },
    }
}

fn required_str<'a>(args: &'a HashMap<String, Value>, name: &str) -> Result<&'a str, String> {
    args.get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| format!("Missing or invalid argument: {}", name))
}

fn optional_u32(args: &HashMap<String, Value>, name: &str) -> Result<Option<u32>, String> {
    match args.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| format!("Invalid argument: {} must be a non-negative integer", name)),
    }
}
