//! Authentication settings parsed from the process environment.

use zeroize::Zeroizing;

use super::{AuthError, AuthResult};

/// Variable read by the ambient credential to choose which sources to try.
pub const AZURE_TOKEN_CREDENTIALS: &str = "AZURE_TOKEN_CREDENTIALS";

/// Operator override for [`AZURE_TOKEN_CREDENTIALS`].
pub const ADO_MCP_AZURE_TOKEN_CREDENTIALS: &str = "ADO_MCP_AZURE_TOKEN_CREDENTIALS";

/// Selector forced when no override is given. Limits the ambient chain to
/// developer tools instead of probing every source.
pub const DEFAULT_CREDENTIAL_SELECTOR: &str = "dev";

const ADO_AUTH: &str = "ADO_AUTH";
const TENANT_VARS: &[&str] = &["AZURE_AD_TENANT_ID", "AZURE_TENANT_ID"];
const CLIENT_ID_VARS: &[&str] = &["AZURE_AD_CLIENT_ID", "AZURE_CLIENT_ID"];
const CLIENT_SECRET_VARS: &[&str] = &["AZURE_AD_CLIENT_SECRET", "AZURE_CLIENT_SECRET"];
const ASSERTION_VARS: &[&str] = &["MCP_USER_ASSERTION", "ADO_USER_ASSERTION"];
const AUTHORITY_HOST: &str = "AZURE_AUTHORITY_HOST";

/// Which token strategy the process uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// Azure CLI / ambient credential chain
    #[default]
    Default,
    /// Delegated exchange of a caller-supplied user assertion
    OnBehalfOf,
}

impl AuthMode {
    /// Parse the `ADO_AUTH` value. Only the exact value `obo` selects the
    /// delegated flow.
    pub fn from_flag(value: Option<&str>) -> Self {
        match value {
            Some("obo") => Self::OnBehalfOf,
            _ => Self::Default,
        }
    }

    /// Short label for logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::OnBehalfOf => "obo",
        }
    }
}

impl std::fmt::Display for AuthMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw on-behalf-of settings as found in the environment. Any field may be
/// missing; [`OboSettings::validate`] turns them into an [`OboConfig`].
#[derive(Clone, Default)]
pub struct OboSettings {
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<Zeroizing<String>>,
    pub user_assertion: Option<Zeroizing<String>>,
}

impl std::fmt::Debug for OboSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OboSettings")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("has_client_secret", &self.client_secret.is_some())
            .field("has_user_assertion", &self.user_assertion.is_some())
            .finish()
    }
}

impl OboSettings {
    /// Check that every field is present.
    ///
    /// The assertion is checked on its own first; the three app registration
    /// fields are reported together.
    pub fn validate(&self) -> AuthResult<OboConfig> {
        let Some(user_assertion) = self.user_assertion.clone() else {
            return Err(AuthError::Configuration(format!(
                "On-behalf-of auth requires a user assertion in {} or {}",
                ASSERTION_VARS[0], ASSERTION_VARS[1]
            )));
        };

        match (&self.tenant_id, &self.client_id, &self.client_secret) {
            (Some(tenant_id), Some(client_id), Some(client_secret)) => Ok(OboConfig {
                tenant_id: tenant_id.clone(),
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
                user_assertion,
            }),
            _ => {
                let mut missing = Vec::new();
                if self.tenant_id.is_none() {
                    missing.push("tenant id (AZURE_AD_TENANT_ID/AZURE_TENANT_ID)");
                }
                if self.client_id.is_none() {
                    missing.push("client id (AZURE_AD_CLIENT_ID/AZURE_CLIENT_ID)");
                }
                if self.client_secret.is_none() {
                    missing.push("client secret (AZURE_AD_CLIENT_SECRET/AZURE_CLIENT_SECRET)");
                }
                Err(AuthError::Configuration(format!(
                    "On-behalf-of auth is missing: {}",
                    missing.join(", ")
                )))
            }
        }
    }
}

/// Complete on-behalf-of configuration.
#[derive(Clone)]
pub struct OboConfig {
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret: Zeroizing<String>,
    pub user_assertion: Zeroizing<String>,
}

impl std::fmt::Debug for OboConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OboConfig")
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[redacted]")
            .field("user_assertion", &"[redacted]")
            .finish()
    }
}

/// Settings for the non-delegated credential chain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CredentialChainConfig {
    /// Tenant to pin the Azure CLI credential to
    pub tenant_id: Option<String>,
}

/// Which sources the ambient credential may use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSelector {
    /// Developer tools: Azure CLI, Azure Developer CLI
    Dev,
    /// Deployed workloads: environment service principal, workload identity, managed identity
    Prod,
    /// Exactly one named credential
    Specific(String),
}

impl CredentialSelector {
    /// Names accepted for [`CredentialSelector::Specific`].
    pub const CREDENTIAL_NAMES: &'static [&'static str] = &[
        "EnvironmentCredential",
        "WorkloadIdentityCredential",
        "ManagedIdentityCredential",
        "AzureCliCredential",
        "AzureDeveloperCliCredential",
    ];

    /// Parse a selector value.
    pub fn parse(value: &str) -> AuthResult<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("dev") {
            return Ok(Self::Dev);
        }
        if value.eq_ignore_ascii_case("prod") {
            return Ok(Self::Prod);
        }
        Self::CREDENTIAL_NAMES
            .iter()
            .find(|name| name.eq_ignore_ascii_case(value))
            .map(|name| Self::Specific((*name).to_string()))
            .ok_or_else(|| {
                AuthError::Configuration(format!(
                    "Invalid {} value '{}': expected dev, prod or one of {}",
                    AZURE_TOKEN_CREDENTIALS,
                    value,
                    Self::CREDENTIAL_NAMES.join(", ")
                ))
            })
    }
}

/// Typed authentication configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Strategy selected by `ADO_AUTH`
    pub mode: AuthMode,
    /// On-behalf-of settings (only used in [`AuthMode::OnBehalfOf`])
    pub obo: OboSettings,
    /// Credential chain settings (only used in [`AuthMode::Default`])
    pub chain: CredentialChainConfig,
    /// Value exported as `AZURE_TOKEN_CREDENTIALS`
    pub credential_selector: String,
    /// Entra ID authority host override
    pub authority_host: Option<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            mode: AuthMode::Default,
            obo: OboSettings::default(),
            chain: CredentialChainConfig::default(),
            credential_selector: DEFAULT_CREDENTIAL_SELECTOR.to_string(),
            authority_host: None,
        }
    }
}

impl AuthConfig {
    /// Read configuration from the process environment.
    ///
    /// `tenant_flag` is the `--tenant` argument; it wins over the tenant
    /// variables for the credential chain.
    pub fn from_env(tenant_flag: Option<String>) -> Self {
        Self::from_lookup(tenant_flag, |name| std::env::var(name).ok())
    }

    /// Read configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(tenant_flag: Option<String>, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let first = |names: &[&str]| first_non_empty(&lookup, names);

        let env_tenant = first(TENANT_VARS);
        let chain_tenant = tenant_flag.filter(|t| !t.trim().is_empty()).or_else(|| env_tenant.clone());

        Self {
            mode: AuthMode::from_flag(lookup(ADO_AUTH).as_deref()),
            obo: OboSettings {
                tenant_id: env_tenant,
                client_id: first(CLIENT_ID_VARS),
                client_secret: first(CLIENT_SECRET_VARS).map(Zeroizing::new),
                user_assertion: first(ASSERTION_VARS).map(Zeroizing::new),
            },
            chain: CredentialChainConfig { tenant_id: chain_tenant },
            credential_selector: first(&[ADO_MCP_AZURE_TOKEN_CREDENTIALS])
                .unwrap_or_else(|| DEFAULT_CREDENTIAL_SELECTOR.to_string()),
            authority_host: first(&[AUTHORITY_HOST]),
        }
    }
}

/// Export the credential selector into the process environment.
///
/// This is the only place the crate writes to the environment. It runs once,
/// before any credential is constructed, so that anything reading
/// `AZURE_TOKEN_CREDENTIALS` sees the forced value instead of its own default.
pub fn export_credential_selector(selector: &str) {
    std::env::set_var(AZURE_TOKEN_CREDENTIALS, selector);
    tracing::debug!(selector, "exported {}", AZURE_TOKEN_CREDENTIALS);
}

fn first_non_empty<F>(lookup: &F, names: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    names.iter().filter_map(|name| lookup(name)).find(|value| !value.trim().is_empty())
}
