//! Credential resolution for the Azure DevOps REST API.
//!
//! Every tool invocation asks the [`TokenBroker`] for a fresh bearer token.
//! The broker picks exactly one of two strategies per process:
//!
//! ```text
//!               ADO_AUTH=obo ?
//!                  │
//!        yes ──────┴────── no
//!         │                 │
//!  OnBehalfOfCredential   CredentialChain
//!  (user assertion →      ┌──────────────────────────┐
//!   delegated token)      │ AzureCliCredential(tenant)│  only with a tenant id
//!                         │ DefaultAzureCredential    │
//!                         └──────────────────────────┘
//! ```
//!
//! The ambient sources are the `azure_identity` credentials; only the
//! on-behalf-of exchange is spoken directly. Every credential implements
//! [`azure_core::credentials::TokenCredential`].
//!
//! Credentials are rebuilt per resolution, so nothing is cached across calls.

mod broker;
mod chain;
mod config;
mod credentials;

pub use azure_core::credentials::TokenCredential;
pub use broker::{AzureCredentialProvider, CredentialProvider, TokenBroker};
pub use chain::{ChainedTokenCredential, CredentialChain};
pub use config::{
    export_credential_selector, AuthConfig, AuthMode, CredentialChainConfig, CredentialSelector,
    OboConfig, OboSettings, AZURE_TOKEN_CREDENTIALS, DEFAULT_CREDENTIAL_SELECTOR,
};
pub use credentials::{
    tenant_cli_credential, DefaultAzureCredential, OnBehalfOfCredential, DEFAULT_AUTHORITY_HOST,
};

/// Scope for the Azure DevOps resource. Not configurable.
pub const AZURE_DEVOPS_SCOPE: &str = "499b84ac-1321-427f-aa17-267ca6975798/.default";

/// Result type for credential operations.
pub type AuthResult<T> = Result<T, AuthError>;

/// Errors raised while resolving a bearer token.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// A required setting is missing or inconsistent.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The identity provider was reached but refused or returned nothing.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// No credential source applies to this environment.
    #[error("Credential unavailable: {0}")]
    Unavailable(String),

    /// An Azure SDK credential could not be constructed.
    #[error("Credential error: {0}")]
    Credential(#[from] azure_core::Error),
}

/// An issued bearer token.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    /// Opaque bearer credential
    pub token: String,
    /// Expiry as Unix epoch milliseconds
    pub expires_on_timestamp: i64,
}

impl AccessToken {
    /// Create a new access token.
    pub fn new(token: impl Into<String>, expires_on_timestamp: i64) -> Self {
        Self { token: token.into(), expires_on_timestamp }
    }

    /// Whether the token string is empty.
    pub fn is_empty(&self) -> bool {
        self.token.trim().is_empty()
    }
}

impl From<azure_core::credentials::AccessToken> for AccessToken {
    fn from(token: azure_core::credentials::AccessToken) -> Self {
        let millis = token.expires_on.unix_timestamp().saturating_mul(1000);
        Self::new(token.token.secret(), millis)
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"[redacted]")
            .field("expires_on_timestamp", &self.expires_on_timestamp)
            .finish()
    }
}
