//! Client factory integration tests.

use std::sync::Arc;

use async_trait::async_trait;
use azure_core::credentials::{Secret, TokenRequestOptions};
use serial_test::serial;
use time::OffsetDateTime;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zeroize::Zeroizing;

use azure_devops_mcp::auth::{
    AuthConfig, AuthError, AuthMode, AuthResult, CredentialProvider, OboConfig, OboSettings,
    TokenBroker, TokenCredential,
};
use azure_devops_mcp::{
    org_url, ApiSurface, ClientError, ClientFactory, ConnectionMode, McpClientInfo,
    UserAgentComposer,
};

/// Answers with a fixed token; `None` yields an empty token.
#[derive(Debug)]
struct StaticCredential(Option<&'static str>);

#[async_trait]
impl TokenCredential for StaticCredential {
    async fn get_token(
        &self,
        _scopes: &[&str],
        _options: Option<TokenRequestOptions<'_>>,
    ) -> azure_core::Result<azure_core::credentials::AccessToken> {
        Ok(azure_core::credentials::AccessToken::new(
            Secret::new(self.0.unwrap_or_default()),
            OffsetDateTime::now_utc(),
        ))
    }
}

/// Every credential answers with the same token, or with nothing.
struct StaticProvider(Option<&'static str>);

impl CredentialProvider for StaticProvider {
    fn on_behalf_of(&self, _config: OboConfig) -> Arc<dyn TokenCredential> {
        Arc::new(StaticCredential(self.0))
    }

    fn tenant_cli(&self, _tenant_id: &str) -> AuthResult<Arc<dyn TokenCredential>> {
        Ok(Arc::new(StaticCredential(self.0)))
    }

    fn ambient(&self) -> AuthResult<Arc<dyn TokenCredential>> {
        Ok(Arc::new(StaticCredential(self.0)))
    }
}

fn config(mode: AuthMode) -> AuthConfig {
    AuthConfig {
        mode,
        obo: OboSettings {
            tenant_id: Some("tenant".to_string()),
            client_id: Some("client".to_string()),
            client_secret: Some(Zeroizing::new("secret".to_string())),
            user_assertion: Some(Zeroizing::new("assertion".to_string())),
        },
        ..AuthConfig::default()
    }
}

fn factory(mode: AuthMode, token: Option<&'static str>, org_url: String) -> ClientFactory {
    let broker =
        Arc::new(TokenBroker::with_provider(config(mode), Arc::new(StaticProvider(token))));
    ClientFactory::new(broker, Arc::new(UserAgentComposer::new("1.2.3")), org_url)
}

#[test]
fn test_org_url_for_contoso() {
    assert_eq!(org_url("contoso"), "https://dev.azure.com/contoso");
}

#[test]
#[serial]
fn test_constructor_selection() {
    let url = org_url("contoso");

    let obo = factory(AuthMode::OnBehalfOf, Some("t"), url.clone());
    assert_eq!(obo.connection_mode(), ConnectionMode::DirectBearer);

    let default = factory(AuthMode::Default, Some("t"), url.clone());
    assert_eq!(default.connection_mode(), ConnectionMode::BearerHandler);

    let legacy = factory(AuthMode::OnBehalfOf, Some("t"), url)
        .with_surface(ApiSurface { bearer_token_constructor: false });
    assert_eq!(legacy.connection_mode(), ConnectionMode::BearerHandler);
}

#[tokio::test]
#[serial]
async fn test_build_client_in_both_modes() {
    for (mode, direct) in [(AuthMode::OnBehalfOf, true), (AuthMode::Default, false)] {
        let client = factory(mode, Some("token"), org_url("contoso")).build_client().await.unwrap();
        assert_eq!(client.org_url(), "https://dev.azure.com/contoso");
        assert_eq!(client.org_name(), "contoso");
        assert_eq!(client.uses_bearer_token(), direct);
        assert_eq!(client.options().product_name, "AzureDevOps.MCP");
        assert_eq!(client.options().user_agent, "AzureDevOps.MCP/1.2.3");
    }
}

#[tokio::test]
#[serial]
async fn test_no_token_fails_with_authentication() {
    for mode in [AuthMode::OnBehalfOf, AuthMode::Default] {
        let err = factory(mode, None, org_url("contoso")).build_client().await.unwrap_err();
        assert!(
            matches!(err, ClientError::Auth(AuthError::Authentication(_))),
            "got {:?}",
            err
        );
    }
}

#[tokio::test]
#[serial]
async fn test_missing_obo_field_surfaces_configuration() {
    let mut config = config(AuthMode::OnBehalfOf);
    config.obo.user_assertion = None;
    let broker = Arc::new(TokenBroker::with_provider(config, Arc::new(StaticProvider(Some("t")))));
    let factory =
        ClientFactory::new(broker, Arc::new(UserAgentComposer::new("1.2.3")), org_url("contoso"));

    let err = factory.build_client().await.unwrap_err();
    assert!(matches!(err, ClientError::Auth(AuthError::Configuration(_))));
}

#[tokio::test]
#[serial]
async fn test_connection_carries_current_user_agent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/contoso/_apis/projects"))
        .and(header("Authorization", "Bearer fresh"))
        .and(header("User-Agent", "AzureDevOps.MCP/1.2.3 myclient/0.1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "count": 0, "value": [] })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let user_agent = Arc::new(UserAgentComposer::new("1.2.3"));
    let broker = Arc::new(TokenBroker::with_provider(
        config(AuthMode::Default),
        Arc::new(StaticProvider(Some("fresh"))),
    ));
    let factory =
        ClientFactory::new(broker, Arc::clone(&user_agent), format!("{}/contoso", server.uri()));

    user_agent.append_mcp_client_info(Some(McpClientInfo::new("myclient", "0.1")));

    let client = factory.build_client().await.unwrap();
    let projects = client.list_projects(None, None).await.unwrap();
    assert!(projects.is_empty());
}
