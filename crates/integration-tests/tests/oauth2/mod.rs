mod jwks_caching;
mod metadata;
mod scope_validation;
mod token_validation;

use indoc::formatdoc;
use integration_tests::{AUDIENCE, IdentityProvider};

use crate::upstream_process;

/// Extension trait to add authorization helper methods to reqwest::RequestBuilder
pub trait RequestBuilderExt {
    /// Add Bearer token authorization header
    fn authorization(self, token: &str) -> Self;

    /// Add MCP-style JSON body and headers
    fn mcp_json(self, body: &str) -> Self;
}

impl RequestBuilderExt for reqwest::RequestBuilder {
    fn authorization(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }

    fn mcp_json(self, body: &str) -> Self {
        self.header("Content-Type", "application/json")
            .header("Accept", "application/json, text/event-stream")
            .body(body.to_string())
    }
}

pub const METADATA_URL: &str = "https://mcp.example.com/.well-known/oauth-protected-resource/mcp";

/// Enforced gateway trusting `provider`, requiring `mcp:tools` everywhere and
/// `mcp:admin` below `/admin`.
pub fn oauth_config(provider: &IdentityProvider) -> String {
    oauth_config_with(provider, "")
}

/// Like [`oauth_config`], with extra keys in the `[server.oauth]` table.
pub fn oauth_config_with(provider: &IdentityProvider, oauth_extra: &str) -> String {
    formatdoc! {r#"
        [server.oauth]
        url = "{jwks_url}"
        poll_interval = "5m"
        expected_issuer = "{issuer}"
        expected_audience = "{AUDIENCE}"
        required_scopes = ["mcp:tools"]
        {oauth_extra}

        [server.oauth.path_scopes]
        "/admin" = ["mcp:admin"]

        [server.oauth.protected_resource]
        resource = "{AUDIENCE}"
        authorization_servers = ["{issuer}"]
        scopes_supported = ["mcp:tools", "mcp:admin"]

        {process}
    "#,
        jwks_url = provider.jwks_url(),
        issuer = provider.issuer(),
        process = upstream_process(),
    }
}

pub const PING: &str = r#"{"jsonrpc":"2.0","method":"ping","id":1}"#;
