//! Azure DevOps REST connection.
//!
//! A connection is bound to one organization URL and carries the product
//! metadata and user agent. It is built fresh for every tool call by the
//! [`ClientFactory`] and never pooled.

mod factory;

pub use factory::{ApiSurface, ClientFactory, ConnectionMode};

use serde::{Deserialize, Serialize};

use crate::auth::AuthError;

/// Azure DevOps cloud host.
pub const AZURE_DEVOPS_HOST: &str = "https://dev.azure.com";

/// REST API version used for every request.
pub const API_VERSION: &str = "7.1";

/// Result type for Azure DevOps operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Error types for Azure DevOps operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Azure DevOps API error: {message} (status: {status})")]
    Api { status: u16, message: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Build the organization URL for an organization name.
pub fn org_url(organization: &str) -> String {
    format!("{}/{}", AZURE_DEVOPS_HOST, urlencoding::encode(organization.trim()))
}

/// Metadata attached to every connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOptions {
    /// Fixed product name
    pub product_name: String,
    /// Server package version
    pub product_version: String,
    /// User agent captured when the connection was built
    pub user_agent: String,
}

/// Applies authentication to outgoing requests.
pub trait RequestHandler: Send + Sync {
    /// Decorate a request before it is sent.
    fn prepare_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder;
}

/// Adds `Authorization: Bearer <token>`.
pub struct BearerCredentialHandler {
    token: String,
}

impl BearerCredentialHandler {
    /// Wrap a bearer token.
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

impl RequestHandler for BearerCredentialHandler {
    fn prepare_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.bearer_auth(&self.token)
    }
}

/// How a connection authenticates its requests.
enum Authorization {
    /// Token given directly to the connection
    Bearer(String),
    /// Token wrapped in a request handler
    Handler(Box<dyn RequestHandler>),
}

/// Authenticated handle to one Azure DevOps organization.
pub struct AdoConnection {
    org_url: String,
    options: ConnectionOptions,
    authorization: Authorization,
    client: reqwest::Client,
}

impl std::fmt::Debug for AdoConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let auth = match self.authorization {
            Authorization::Bearer(_) => "bearer",
            Authorization::Handler(_) => "handler",
        };
        f.debug_struct("AdoConnection")
            .field("org_url", &self.org_url)
            .field("options", &self.options)
            .field("authorization", &auth)
            .finish()
    }
}

impl AdoConnection {
    /// Standard constructor: authentication through a request handler.
    pub fn new(
        org_url: impl Into<String>,
        handler: Box<dyn RequestHandler>,
        options: ConnectionOptions,
    ) -> ClientResult<Self> {
        Self::build(org_url.into(), Authorization::Handler(handler), options)
    }

    /// Direct bearer-token constructor.
    pub fn with_bearer_token(
        org_url: impl Into<String>,
        token: impl Into<String>,
        options: ConnectionOptions,
    ) -> ClientResult<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(ClientError::InvalidInput("bearer token is empty".to_string()));
        }
        Self::build(org_url.into(), Authorization::Bearer(token), options)
    }

    fn build(
        org_url: String,
        authorization: Authorization,
        options: ConnectionOptions,
    ) -> ClientResult<Self> {
        let client = reqwest::Client::builder().user_agent(options.user_agent.clone()).build()?;
        Ok(Self { org_url: org_url.trim_end_matches('/').to_string(), options, authorization, client })
    }

    /// Organization URL, e.g. `https://dev.azure.com/contoso`.
    pub fn org_url(&self) -> &str {
        &self.org_url
    }

    /// Organization name: the last path segment of the URL.
    pub fn org_name(&self) -> &str {
        self.org_url.rsplit('/').next().unwrap_or_default()
    }

    /// Product metadata.
    pub fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    /// Whether the direct bearer constructor was used.
    pub fn uses_bearer_token(&self) -> bool {
        matches!(self.authorization, Authorization::Bearer(_))
    }

    /// Make an authenticated request.
    fn request(&self, method: reqwest::Method, url: &str) -> reqwest::RequestBuilder {
        let request = self.client.request(method, url).header("Accept", "application/json");
        match &self.authorization {
            Authorization::Bearer(token) => request.bearer_auth(token),
            Authorization::Handler(handler) => handler.prepare_request(request),
        }
    }

    /// Parse an error response.
    async fn parse_error(response: reqwest::Response) -> ClientError {
        let status = response.status().as_u16();

        match status {
            401 | 203 => ClientError::Unauthorized,
            404 => ClientError::NotFound(response.url().path().to_string()),
            429 => ClientError::RateLimited,
            _ => {
                let message = response
                    .json::<serde_json::Value>()
                    .await
                    .ok()
                    .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(String::from))
                    .unwrap_or_else(|| format!("HTTP {}", status));
                ClientError::Api { status, message }
            }
        }
    }

    /// GET a JSON document from a path under the organization URL.
    pub async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> ClientResult<T> {
        let url = format!("{}/{}", self.org_url, path.trim_start_matches('/'));
        let mut params: Vec<(&str, String)> = query.to_vec();
        params.push(("api-version", API_VERSION.to_string()));

        let request = self.request(reqwest::Method::GET, &url).query(&params);
        Self::send_json(request).await
    }

    /// POST a JSON body to an absolute URL, e.g. another Azure DevOps service
    /// host, with this connection's authorization and user agent.
    pub async fn post_json<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> ClientResult<T> {
        let request =
            self.request(reqwest::Method::POST, url).query(&[("api-version", API_VERSION)]).json(body);
        Self::send_json(request).await
    }

    async fn send_json<T: for<'de> Deserialize<'de>>(
        request: reqwest::RequestBuilder,
    ) -> ClientResult<T> {
        let response = request.send().await?;

        // Azure DevOps answers unauthenticated calls with a 203 sign-in page.
        if !response.status().is_success() || response.status().as_u16() == 203 {
            return Err(Self::parse_error(response).await);
        }

        Ok(response.json().await?)
    }

    /// List projects in the organization.
    pub async fn list_projects(
        &self,
        top: Option<u32>,
        skip: Option<u32>,
    ) -> ClientResult<Vec<TeamProject>> {
        let mut query = Vec::new();
        if let Some(top) = top {
            query.push(("$top", top.to_string()));
        }
        if let Some(skip) = skip {
            query.push(("$skip", skip.to_string()));
        }
        let list: ListResponse<TeamProject> = self.get_json("_apis/projects", &query).await?;
        Ok(list.value)
    }

    /// List teams in a project.
    pub async fn list_project_teams(&self, project: &str) -> ClientResult<Vec<WebApiTeam>> {
        if project.trim().is_empty() {
            return Err(ClientError::InvalidInput("project is required".to_string()));
        }
        let path = format!("_apis/projects/{}/teams", urlencoding::encode(project));
        let list: ListResponse<WebApiTeam> = self.get_json(&path, &[]).await?;
        Ok(list.value)
    }

    /// Fetch one work item with all fields.
    pub async fn get_work_item(&self, id: u64) -> ClientResult<WorkItem> {
        let path = format!("_apis/wit/workitems/{}", id);
        self.get_json(&path, &[("$expand", "all".to_string())]).await
    }
}

/// Standard `{ count, value }` list envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListResponse<T> {
    /// Number of items
    #[serde(default)]
    pub count: u64,
    /// Items
    pub value: Vec<T>,
}

/// An Azure DevOps project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TeamProject {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
}

/// A team inside a project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebApiTeam {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
}

/// A work item. Fields are kept as raw JSON keyed by reference name
/// (`System.Title`, `System.State`, ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: u64,
    #[serde(default)]
    pub rev: u64,
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl WorkItem {
    /// `System.Title`, if present.
    pub fn title(&self) -> Option<&str> {
        self.fields.get("System.Title").and_then(|v| v.as_str())
    }
}
