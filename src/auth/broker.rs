//! Per-call token resolution.

use std::sync::Arc;

use super::chain::CredentialChain;
use super::config::{export_credential_selector, AuthConfig, AuthMode, CredentialSelector, OboConfig};
use super::credentials::{
    tenant_cli_credential, DefaultAzureCredential, OnBehalfOfCredential, DEFAULT_AUTHORITY_HOST,
};
use super::{AccessToken, AuthError, AuthResult, TokenCredential, AZURE_DEVOPS_SCOPE};

const CLI_LOGIN_HINT: &str = "Failed to obtain Azure DevOps token. Ensure you are logged in with the Azure CLI (az login) or pass a valid tenant id with --tenant";

/// Constructs credential objects for the broker.
///
/// Construction is synchronous and does no network I/O; tokens are only
/// requested when the broker calls [`TokenCredential::get_token`].
pub trait CredentialProvider: Send + Sync {
    /// Delegated credential for a validated on-behalf-of configuration.
    fn on_behalf_of(&self, config: OboConfig) -> Arc<dyn TokenCredential>;

    /// Azure CLI credential pinned to `tenant_id`.
    fn tenant_cli(&self, tenant_id: &str) -> AuthResult<Arc<dyn TokenCredential>>;

    /// The ambient default credential.
    fn ambient(&self) -> AuthResult<Arc<dyn TokenCredential>>;
}

/// Real Entra ID credentials.
pub struct AzureCredentialProvider {
    http: reqwest::Client,
    authority_host: String,
    selector: String,
}

impl AzureCredentialProvider {
    /// Create a provider from the auth configuration.
    pub fn new(config: &AuthConfig) -> Self {
        Self::with_http(config, reqwest::Client::new())
    }

    /// Create a provider using a specific HTTP client.
    pub fn with_http(config: &AuthConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            authority_host: config
                .authority_host
                .clone()
                .unwrap_or_else(|| DEFAULT_AUTHORITY_HOST.to_string()),
            selector: config.credential_selector.clone(),
        }
    }
}

impl CredentialProvider for AzureCredentialProvider {
    fn on_behalf_of(&self, config: OboConfig) -> Arc<dyn TokenCredential> {
        Arc::new(OnBehalfOfCredential::new(config, self.authority_host.clone(), self.http.clone()))
    }

    fn tenant_cli(&self, tenant_id: &str) -> AuthResult<Arc<dyn TokenCredential>> {
        tenant_cli_credential(tenant_id)
    }

    fn ambient(&self) -> AuthResult<Arc<dyn TokenCredential>> {
        let selector = CredentialSelector::parse(&self.selector)?;
        Ok(Arc::new(DefaultAzureCredential::new(&selector)?))
    }
}

/// Resolves a bearer token for Azure DevOps on every call.
///
/// Holds only immutable configuration, so it can be shared behind an `Arc`
/// and called concurrently. Each call builds its credentials from scratch.
pub struct TokenBroker {
    config: AuthConfig,
    provider: Arc<dyn CredentialProvider>,
}

impl TokenBroker {
    /// Create a broker backed by real Entra ID credentials.
    ///
    /// Exports the credential selector before anything else is built.
    pub fn new(config: AuthConfig) -> Self {
        export_credential_selector(&config.credential_selector);
        let provider = Arc::new(AzureCredentialProvider::new(&config));
        Self { config, provider }
    }

    /// Create a broker with a custom credential provider.
    pub fn with_provider(config: AuthConfig, provider: Arc<dyn CredentialProvider>) -> Self {
        export_credential_selector(&config.credential_selector);
        Self { config, provider }
    }

    /// The strategy this broker uses.
    pub fn mode(&self) -> AuthMode {
        self.config.mode
    }

    /// Resolve a fresh token.
    pub async fn resolve_token(&self) -> AuthResult<AccessToken> {
        match self.config.mode {
            AuthMode::OnBehalfOf => self.resolve_on_behalf_of().await,
            AuthMode::Default => self.resolve_default().await,
        }
    }

    async fn resolve_on_behalf_of(&self) -> AuthResult<AccessToken> {
        let settings = &self.config.obo;
        tracing::info!(
            has_user_assertion = settings.user_assertion.is_some(),
            has_tenant_id = settings.tenant_id.is_some(),
            has_client_id = settings.client_id.is_some(),
            has_client_secret = settings.client_secret.is_some(),
            "resolving token via on-behalf-of flow"
        );

        let obo = settings.validate()?;
        let credential = self.provider.on_behalf_of(obo);
        let token = credential
            .get_token(&[AZURE_DEVOPS_SCOPE], None)
            .await
            .map(AccessToken::from)
            .map_err(|e| AuthError::Authentication(e.to_string()))?;
        if token.is_empty() {
            return Err(AuthError::Authentication(
                "On-behalf-of exchange returned no token".to_string(),
            ));
        }

        tracing::info!(expires_on = token.expires_on_timestamp, "on-behalf-of token acquired");
        Ok(token)
    }

    async fn resolve_default(&self) -> AuthResult<AccessToken> {
        let chain = match CredentialChain::build(&self.config.chain, self.provider.as_ref()) {
            Ok(chain) => chain,
            Err(AuthError::Unavailable(reason)) => {
                return Err(AuthError::Authentication(format!("{}: {}", CLI_LOGIN_HINT, reason)));
            }
            Err(AuthError::Credential(e)) => {
                return Err(AuthError::Authentication(format!("{}: {}", CLI_LOGIN_HINT, e)));
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(
            credentials = ?chain.sources(),
            tenant_id = self.config.chain.tenant_id.as_deref().unwrap_or("-"),
            "resolving token via credential chain"
        );

        let token = chain
            .get_token(&[AZURE_DEVOPS_SCOPE], None)
            .await
            .map(AccessToken::from)
            .map_err(|e| AuthError::Authentication(format!("{}: {}", CLI_LOGIN_HINT, e)))?;
        if token.is_empty() {
            return Err(AuthError::Authentication(CLI_LOGIN_HINT.to_string()));
        }
        Ok(token)
    }
}
