//! Builds an authenticated connection per tool call.

use std::sync::Arc;

use super::{AdoConnection, BearerCredentialHandler, ClientError, ClientResult, ConnectionOptions};
use crate::auth::{AuthError, AuthMode, TokenBroker};
use crate::useragent::{UserAgentComposer, PRODUCT_NAME};

/// Constructors the connection type offers.
///
/// The direct bearer-token constructor is only used for on-behalf-of tokens.
/// When it is not available every mode goes through the handler constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiSurface {
    /// Whether [`AdoConnection::with_bearer_token`] may be used
    pub bearer_token_constructor: bool,
}

impl Default for ApiSurface {
    fn default() -> Self {
        Self { bearer_token_constructor: true }
    }
}

/// Which constructor a factory call will use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionMode {
    /// Raw token given to the connection
    DirectBearer,
    /// Token wrapped in a [`BearerCredentialHandler`]
    BearerHandler,
}

/// Resolves a token and wraps it in a fresh [`AdoConnection`].
#[derive(Clone)]
pub struct ClientFactory {
    broker: Arc<TokenBroker>,
    user_agent: Arc<UserAgentComposer>,
    org_url: String,
    surface: ApiSurface,
}

impl ClientFactory {
    /// Create a factory for `org_url`.
    pub fn new(
        broker: Arc<TokenBroker>,
        user_agent: Arc<UserAgentComposer>,
        org_url: impl Into<String>,
    ) -> Self {
        Self { broker, user_agent, org_url: org_url.into(), surface: ApiSurface::default() }
    }

    /// Override the constructor capabilities.
    pub fn with_surface(mut self, surface: ApiSurface) -> Self {
        self.surface = surface;
        self
    }

    /// Organization URL connections are bound to.
    pub fn org_url(&self) -> &str {
        &self.org_url
    }

    /// Constructor selected for the broker's auth mode.
    pub fn connection_mode(&self) -> ConnectionMode {
        if self.broker.mode() == AuthMode::OnBehalfOf && self.surface.bearer_token_constructor {
            ConnectionMode::DirectBearer
        } else {
            ConnectionMode::BearerHandler
        }
    }

    /// Resolve a token and build a connection. No retries.
    pub async fn build_client(&self) -> ClientResult<AdoConnection> {
        let token = self.broker.resolve_token().await?;
        if token.is_empty() {
            return Err(ClientError::Auth(AuthError::Authentication(
                "resolved token is empty".to_string(),
            )));
        }

        let options = ConnectionOptions {
            product_name: PRODUCT_NAME.to_string(),
            product_version: crate::VERSION.to_string(),
            user_agent: self.user_agent.user_agent(),
        };

        let mode = self.connection_mode();
        let connection = match mode {
            ConnectionMode::DirectBearer => {
                AdoConnection::with_bearer_token(&self.org_url, token.token, options)?
            }
            ConnectionMode::BearerHandler => AdoConnection::new(
                &self.org_url,
                Box::new(BearerCredentialHandler::new(token.token)),
                options,
            )?,
        };

        tracing::info!(
            org_url = %self.org_url,
            auth_mode = %self.broker.mode(),
            constructor = ?mode,
            "Azure DevOps connection created"
        );
        Ok(connection)
    }
}
