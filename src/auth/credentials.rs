//! Concrete Entra ID credentials.
//!
//! Ambient sources come from `azure_identity`. The on-behalf-of exchange has
//! no SDK credential, so it posts the grant to the token endpoint directly.
//! None of them cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use azure_core::credentials::{AccessToken, Secret, TokenCredential, TokenRequestOptions};
use azure_core::error::ErrorKind;
use azure_core::http::ClientOptions;
use azure_identity::{
    AzureCliCredential, AzureCliCredentialOptions, AzureDeveloperCliCredential,
    ClientSecretCredential, ManagedIdentityCredential, ManagedIdentityCredentialOptions,
    UserAssignedId, WorkloadIdentityCredential,
};
use serde::Deserialize;
use time::OffsetDateTime;

use super::chain::ChainedTokenCredential;
use super::config::{CredentialSelector, OboConfig};
use super::{AuthError, AuthResult};

/// Public cloud Entra ID authority.
pub const DEFAULT_AUTHORITY_HOST: &str = "https://login.microsoftonline.com";

const OBO_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

const IMDS_ADDR: &str = "169.254.169.254:80";
const IMDS_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

const ENVIRONMENT: &str = "EnvironmentCredential";
const WORKLOAD_IDENTITY: &str = "WorkloadIdentityCredential";
const MANAGED_IDENTITY: &str = "ManagedIdentityCredential";
const AZURE_CLI: &str = "AzureCliCredential";
const AZURE_DEVELOPER_CLI: &str = "AzureDeveloperCliCredential";

fn credential_error(message: String) -> azure_core::Error {
    azure_core::Error::with_message_fn(ErrorKind::Credential, || message)
}

// ============================================================================
// On-behalf-of
// ============================================================================

/// Response from the Entra ID v2 token endpoint.
#[derive(Debug, Deserialize)]
struct OAuth2TokenResponse {
    #[serde(default)]
    access_token: Option<String>,
    /// Token lifetime in seconds
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Error body from the Entra ID token endpoint.
#[derive(Debug, Deserialize)]
struct OAuth2ErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

fn token_url(authority_host: &str, tenant_id: &str) -> String {
    format!("{}/{}/oauth2/v2.0/token", authority_host.trim_end_matches('/'), tenant_id)
}

/// Exchanges a user assertion for a delegated token.
pub struct OnBehalfOfCredential {
    config: OboConfig,
    authority_host: String,
    http: reqwest::Client,
}

impl std::fmt::Debug for OnBehalfOfCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnBehalfOfCredential")
            .field("config", &self.config)
            .field("authority_host", &self.authority_host)
            .finish_non_exhaustive()
    }
}

impl OnBehalfOfCredential {
    /// Create a new on-behalf-of credential.
    pub fn new(config: OboConfig, authority_host: impl Into<String>, http: reqwest::Client) -> Self {
        Self { config, authority_host: authority_host.into(), http }
    }
}

#[async_trait]
impl TokenCredential for OnBehalfOfCredential {
    async fn get_token(
        &self,
        scopes: &[&str],
        _options: Option<TokenRequestOptions<'_>>,
    ) -> azure_core::Result<AccessToken> {
        let url = token_url(&self.authority_host, &self.config.tenant_id);
        let scope = scopes.join(" ");
        let params = [
            ("grant_type", OBO_GRANT_TYPE),
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("assertion", self.config.user_assertion.as_str()),
            ("scope", scope.as_str()),
            ("requested_token_use", "on_behalf_of"),
        ];

        let response = self
            .http
            .post(&url)
            .form(&params)
            .send()
            .await
            .map_err(|e| credential_error(format!("On-behalf-of token request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = match serde_json::from_str::<OAuth2ErrorResponse>(&body) {
                Ok(err) => format!("{}: {}", err.error, err.error_description.unwrap_or_default()),
                Err(_) => body,
            };
            return Err(credential_error(format!(
                "Token request failed with status {}: {}",
                status, detail
            )));
        }

        let body: OAuth2TokenResponse = response
            .json()
            .await
            .map_err(|e| credential_error(format!("Invalid token response: {}", e)))?;
        let token = body.access_token.filter(|t| !t.is_empty()).ok_or_else(|| {
            credential_error("On-behalf-of exchange returned no access token".to_string())
        })?;

        let expires_on =
            OffsetDateTime::now_utc() + time::Duration::seconds(body.expires_in.unwrap_or(3600));
        Ok(AccessToken::new(Secret::new(token), expires_on))
    }
}

// ============================================================================
// Azure CLI
// ============================================================================

/// Azure CLI credential pinned to a tenant.
pub fn tenant_cli_credential(tenant_id: &str) -> AuthResult<Arc<dyn TokenCredential>> {
    let options =
        AzureCliCredentialOptions { tenant_id: Some(tenant_id.to_string()), ..Default::default() };
    let credential: Arc<dyn TokenCredential> = AzureCliCredential::new(Some(options))?;
    Ok(credential)
}

// ============================================================================
// Managed identity
// ============================================================================

/// Managed identity that first checks the metadata endpoint is reachable.
///
/// Off Azure, IMDS never answers and the SDK would wait out its retries.
/// App Service and Functions expose their own endpoint through
/// `IDENTITY_ENDPOINT` / `MSI_ENDPOINT`, so the check is skipped there.
#[derive(Debug)]
struct ReachableManagedIdentity {
    inner: Arc<ManagedIdentityCredential>,
}

#[async_trait]
impl TokenCredential for ReachableManagedIdentity {
    async fn get_token(
        &self,
        scopes: &[&str],
        options: Option<TokenRequestOptions<'_>>,
    ) -> azure_core::Result<AccessToken> {
        if !has_managed_identity_endpoint() && !is_reachable(IMDS_ADDR, IMDS_CONNECT_TIMEOUT).await {
            return Err(credential_error(format!(
                "{}: IMDS endpoint {} not reachable within {:?}",
                MANAGED_IDENTITY, IMDS_ADDR, IMDS_CONNECT_TIMEOUT
            )));
        }
        self.inner.get_token(scopes, options).await
    }
}

fn has_managed_identity_endpoint() -> bool {
    std::env::var_os("IDENTITY_ENDPOINT").is_some() || std::env::var_os("MSI_ENDPOINT").is_some()
}

async fn is_reachable(addr: &str, timeout: Duration) -> bool {
    matches!(tokio::time::timeout(timeout, tokio::net::TcpStream::connect(addr)).await, Ok(Ok(_)))
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn managed_identity() -> azure_core::Result<Arc<dyn TokenCredential>> {
    let options = ManagedIdentityCredentialOptions {
        user_assigned_id: env_var("AZURE_CLIENT_ID").map(UserAssignedId::ClientId),
        client_options: ClientOptions::default(),
    };
    let inner = ManagedIdentityCredential::new(Some(options))?;
    Ok(Arc::new(ReachableManagedIdentity { inner }))
}

// ============================================================================
// Ambient chain
// ============================================================================

/// Service principal from `AZURE_TENANT_ID`, `AZURE_CLIENT_ID` and
/// `AZURE_CLIENT_SECRET`, or nothing when any of them is unset.
fn environment() -> azure_core::Result<Option<Arc<dyn TokenCredential>>> {
    let (Some(tenant_id), Some(client_id), Some(client_secret)) =
        (env_var("AZURE_TENANT_ID"), env_var("AZURE_CLIENT_ID"), env_var("AZURE_CLIENT_SECRET"))
    else {
        return Ok(None);
    };
    let credential: Arc<dyn TokenCredential> =
        ClientSecretCredential::new(&tenant_id, client_id, Secret::new(client_secret), None)?;
    Ok(Some(credential))
}

/// Build one named source. `Ok(None)` means it is not configured here.
fn build_source(name: &'static str) -> azure_core::Result<Option<Arc<dyn TokenCredential>>> {
    let credential: Arc<dyn TokenCredential> = match name {
        ENVIRONMENT => return environment(),
        WORKLOAD_IDENTITY => match WorkloadIdentityCredential::new(None) {
            Ok(credential) => credential,
            Err(e) => {
                tracing::debug!(credential = name, error = %e, "not configured");
                return Ok(None);
            }
        },
        MANAGED_IDENTITY => managed_identity()?,
        AZURE_CLI => AzureCliCredential::new(None)?,
        AZURE_DEVELOPER_CLI => AzureDeveloperCliCredential::new(None)?,
        _ => return Ok(None),
    };
    Ok(Some(credential))
}

/// Ambient credential chain driven by a [`CredentialSelector`].
///
/// `dev` tries the Azure CLI and then the Azure Developer CLI; `prod` tries a
/// service principal from the environment, workload identity and managed
/// identity; a credential name selects just that credential.
#[derive(Debug)]
pub struct DefaultAzureCredential {
    chain: ChainedTokenCredential,
}

impl DefaultAzureCredential {
    /// Build the chain for `selector`.
    ///
    /// Fails with [`AuthError::Unavailable`] when no selected credential can
    /// be constructed in this environment.
    pub fn new(selector: &CredentialSelector) -> AuthResult<Self> {
        let names: Vec<&'static str> = match selector {
            CredentialSelector::Dev => vec![AZURE_CLI, AZURE_DEVELOPER_CLI],
            CredentialSelector::Prod => vec![ENVIRONMENT, WORKLOAD_IDENTITY, MANAGED_IDENTITY],
            CredentialSelector::Specific(name) => CredentialSelector::CREDENTIAL_NAMES
                .iter()
                .copied()
                .filter(|known| *known == name.as_str())
                .collect(),
        };

        let mut sources = Vec::new();
        let mut skipped = Vec::new();
        for name in names {
            match build_source(name) {
                Ok(Some(credential)) => sources.push((name, credential)),
                Ok(None) => skipped.push(format!("{}: not configured", name)),
                Err(e) => skipped.push(format!("{}: {}", name, e)),
            }
        }

        if sources.is_empty() {
            return Err(AuthError::Unavailable(format!(
                "DefaultAzureCredential: no credential available for {:?}: {}",
                selector,
                skipped.join("; ")
            )));
        }

        Ok(Self { chain: ChainedTokenCredential::named("DefaultAzureCredential", sources) })
    }

    /// Names of the chained credentials, in order.
    pub fn sources(&self) -> Vec<&'static str> {
        self.chain.sources()
    }
}

#[async_trait]
impl TokenCredential for DefaultAzureCredential {
    async fn get_token(
        &self,
        scopes: &[&str],
        options: Option<TokenRequestOptions<'_>>,
    ) -> azure_core::Result<AccessToken> {
        self.chain.get_token(scopes, options).await
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};
    use zeroize::Zeroizing;

    use super::*;
    use crate::auth::AZURE_DEVOPS_SCOPE;

    fn obo_config() -> OboConfig {
        OboConfig {
            tenant_id: "tenant-1".to_string(),
            client_id: "client-1".to_string(),
            client_secret: Zeroizing::new("secret-1".to_string()),
            user_assertion: Zeroizing::new("assertion-1".to_string()),
        }
    }

    fn obo(server: &MockServer) -> OnBehalfOfCredential {
        OnBehalfOfCredential::new(obo_config(), server.uri(), reqwest::Client::new())
    }

    #[tokio::test]
    async fn test_obo_posts_jwt_bearer_grant() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-1/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Ajwt-bearer"))
            .and(body_string_contains("assertion=assertion-1"))
            .and(body_string_contains("requested_token_use=on_behalf_of"))
            .and(body_string_contains("client_id=client-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "Bearer",
                "access_token": "delegated",
                "expires_in": 600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let before = OffsetDateTime::now_utc();
        let token = obo(&server).get_token(&[AZURE_DEVOPS_SCOPE], None).await.unwrap();
        assert_eq!(token.token.secret(), "delegated");
        assert!(token.expires_on >= before + time::Duration::seconds(600));
    }

    #[tokio::test]
    async fn test_obo_error_body_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "AADSTS50013: Assertion failed signature validation."
            })))
            .mount(&server)
            .await;

        let err = obo(&server).get_token(&[AZURE_DEVOPS_SCOPE], None).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("400"));
        assert!(message.contains("invalid_grant"));
        assert!(message.contains("AADSTS50013"));
    }

    #[tokio::test]
    async fn test_obo_without_access_token_fails() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let err = obo(&server).get_token(&[AZURE_DEVOPS_SCOPE], None).await.unwrap_err();
        assert!(err.to_string().contains("no access token"));
    }

    #[test]
    fn test_obo_debug_hides_secrets() {
        let credential = OnBehalfOfCredential::new(
            obo_config(),
            DEFAULT_AUTHORITY_HOST,
            reqwest::Client::new(),
        );
        let debug = format!("{:?}", credential);
        assert!(!debug.contains("secret-1"));
        assert!(!debug.contains("assertion-1"));
    }

    #[test]
    fn test_dev_selector_uses_cli_tools() {
        let credential = DefaultAzureCredential::new(&CredentialSelector::Dev).unwrap();
        assert_eq!(credential.sources(), vec![AZURE_CLI, AZURE_DEVELOPER_CLI]);
    }

    #[test]
    fn test_specific_selector_uses_one_credential() {
        let selector = CredentialSelector::Specific(MANAGED_IDENTITY.to_string());
        let credential = DefaultAzureCredential::new(&selector).unwrap();
        assert_eq!(credential.sources(), vec![MANAGED_IDENTITY]);
    }

    #[test]
    #[serial]
    fn test_prod_selector_includes_service_principal_when_configured() {
        std::env::set_var("AZURE_TENANT_ID", "tenant-1");
        std::env::set_var("AZURE_CLIENT_ID", "client-1");
        std::env::set_var("AZURE_CLIENT_SECRET", "secret-1");
        std::env::remove_var("AZURE_FEDERATED_TOKEN_FILE");

        let sources = DefaultAzureCredential::new(&CredentialSelector::Prod).map(|c| c.sources());

        std::env::remove_var("AZURE_TENANT_ID");
        std::env::remove_var("AZURE_CLIENT_ID");
        std::env::remove_var("AZURE_CLIENT_SECRET");

        let sources = sources.unwrap();
        assert_eq!(sources.first(), Some(&ENVIRONMENT));
        assert_eq!(sources.last(), Some(&MANAGED_IDENTITY));
        assert!(!sources.contains(&WORKLOAD_IDENTITY));
    }

    #[test]
    #[serial]
    fn test_environment_skipped_without_secret() {
        std::env::remove_var("AZURE_CLIENT_SECRET");
        assert!(environment().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reachability_check() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open = listener.local_addr().unwrap().to_string();
        assert!(is_reachable(&open, Duration::from_secs(1)).await);

        drop(listener);
        assert!(!is_reachable(&open, Duration::from_millis(200)).await);
    }
}
