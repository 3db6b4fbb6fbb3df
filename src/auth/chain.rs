//! Ordered credential fallback.

use std::sync::Arc;

use async_trait::async_trait;
use azure_core::credentials::{AccessToken, TokenCredential, TokenRequestOptions};
use azure_core::error::ErrorKind;

use super::broker::CredentialProvider;
use super::config::CredentialChainConfig;
use super::AuthResult;

/// Builds the credential chain for the non-delegated path.
pub struct CredentialChain;

impl CredentialChain {
    /// Ordered credentials to try.
    ///
    /// With a tenant id the tenant-pinned Azure CLI credential comes first and
    /// the ambient credential second. Without one, only the ambient credential
    /// is used. No tokens are requested here.
    pub fn build(
        config: &CredentialChainConfig,
        provider: &dyn CredentialProvider,
    ) -> AuthResult<ChainedTokenCredential> {
        let mut sources: Vec<(&'static str, Arc<dyn TokenCredential>)> = Vec::new();
        if let Some(tenant_id) = config.tenant_id.as_deref().filter(|t| !t.trim().is_empty()) {
            sources.push(("AzureCliCredential", provider.tenant_cli(tenant_id)?));
        }
        sources.push(("DefaultAzureCredential", provider.ambient()?));
        Ok(ChainedTokenCredential::named("CredentialChain", sources))
    }
}

/// Tries each credential in order and returns the first non-empty token.
///
/// When every entry fails, the error lists each failure in order.
pub struct ChainedTokenCredential {
    name: &'static str,
    sources: Vec<(&'static str, Arc<dyn TokenCredential>)>,
}

impl std::fmt::Debug for ChainedTokenCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainedTokenCredential")
            .field("name", &self.name)
            .field("sources", &self.sources())
            .finish()
    }
}

impl ChainedTokenCredential {
    /// Create a chain with a diagnostic name.
    pub fn named(name: &'static str, sources: Vec<(&'static str, Arc<dyn TokenCredential>)>) -> Self {
        Self { name, sources }
    }

    /// Names of the chained credentials, in order.
    pub fn sources(&self) -> Vec<&'static str> {
        self.sources.iter().map(|(name, _)| *name).collect()
    }

    /// Number of chained credentials.
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Whether the chain has no credentials.
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
impl TokenCredential for ChainedTokenCredential {
    async fn get_token(
        &self,
        scopes: &[&str],
        options: Option<TokenRequestOptions<'_>>,
    ) -> azure_core::Result<AccessToken> {
        let mut failures = Vec::new();

        for (name, source) in &self.sources {
            match source.get_token(scopes, options.clone()).await {
                Ok(token) if !token.token.secret().trim().is_empty() => {
                    tracing::debug!(chain = self.name, credential = name, "token acquired");
                    return Ok(token);
                }
                Ok(_) => {
                    tracing::debug!(chain = self.name, credential = name, "empty token returned");
                    failures.push(format!("{}: returned an empty token", name));
                }
                Err(e) => {
                    tracing::debug!(chain = self.name, credential = name, error = %e, "credential failed");
                    failures.push(format!("{}: {}", name, format_error_chain(&e)));
                }
            }
        }

        Err(azure_core::Error::with_message_fn(ErrorKind::Credential, || {
            format!("{}: all credentials failed:\n{}", self.name, failures.join("\n"))
        }))
    }
}

/// Flatten an error and its sources into one line.
fn format_error_chain(error: &azure_core::Error) -> String {
    use std::error::Error;

    let mut current: Option<&dyn Error> = Some(error);
    let mut stack = Vec::new();
    while let Some(err) = current.take() {
        stack.push(err.to_string());
        current = err.source();
    }
    stack.join(" - ")
}
