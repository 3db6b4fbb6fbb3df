//! User agent sent with every Azure DevOps request.
//!
//! The connecting MCP client only identifies itself after the handshake, so
//! the composer starts with the server version alone and learns the client
//! once, later.

use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

/// Product token at the start of the user agent.
pub const PRODUCT_NAME: &str = "AzureDevOps.MCP";

/// Name and version an MCP client reports during `initialize`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct McpClientInfo {
    /// Client name
    pub name: String,
    /// Client version
    pub version: String,
}

impl McpClientInfo {
    /// Create client info.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self { name: name.into(), version: version.into() }
    }
}

/// Accumulates identifying metadata into the user agent string.
#[derive(Debug)]
pub struct UserAgentComposer {
    base_version: String,
    client_info: OnceCell<McpClientInfo>,
}

impl UserAgentComposer {
    /// Start with the server's own version.
    pub fn new(base_version: impl Into<String>) -> Self {
        Self { base_version: base_version.into(), client_info: OnceCell::new() }
    }

    /// Record the connecting client. Only the first client is kept.
    pub fn append_mcp_client_info(&self, info: Option<McpClientInfo>) {
        let Some(info) = info else {
            return;
        };
        if let Err(ignored) = self.client_info.set(info) {
            tracing::debug!(client = %ignored.name, "client info already recorded, ignoring");
        }
    }

    /// Client recorded so far, if any.
    pub fn client_info(&self) -> Option<&McpClientInfo> {
        self.client_info.get()
    }

    /// Current user agent string.
    pub fn user_agent(&self) -> String {
        match self.client_info.get() {
            Some(client) => {
                format!("{}/{} {}/{}", PRODUCT_NAME, self.base_version, client.name, client.version)
            }
            None => format!("{}/{}", PRODUCT_NAME, self.base_version),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_base_version_only() {
        let composer = UserAgentComposer::new("1.2.3");
        assert_eq!(composer.user_agent(), "AzureDevOps.MCP/1.2.3");
    }

    #[test]
    fn test_with_client_info() {
        let composer = UserAgentComposer::new("1.2.3");
        composer.append_mcp_client_info(Some(McpClientInfo::new("myclient", "0.1")));
        assert_eq!(composer.user_agent(), "AzureDevOps.MCP/1.2.3 myclient/0.1");
    }

    #[test]
    fn test_none_leaves_state_untouched() {
        let composer = UserAgentComposer::new("1.2.3");
        composer.append_mcp_client_info(None);
        assert!(composer.client_info().is_none());
        composer.append_mcp_client_info(Some(McpClientInfo::new("late", "2")));
        assert_eq!(composer.user_agent(), "AzureDevOps.MCP/1.2.3 late/2");
    }

    #[test]
    fn test_first_client_wins() {
        let composer = UserAgentComposer::new("1.0.0");
        composer.append_mcp_client_info(Some(McpClientInfo::new("first", "1")));
        composer.append_mcp_client_info(Some(McpClientInfo::new("second", "2")));
        assert_eq!(composer.user_agent(), "AzureDevOps.MCP/1.0.0 first/1");
    }

    #[test]
    fn test_concurrent_readers_see_write() {
        let composer = Arc::new(UserAgentComposer::new("1.0.0"));
        composer.append_mcp_client_info(Some(McpClientInfo::new("vscode", "1.90")));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let composer = Arc::clone(&composer);
                std::thread::spawn(move || composer.user_agent())
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), "AzureDevOps.MCP/1.0.0 vscode/1.90");
        }
    }
}
