//! HTTP server configuration settings.

use std::net::SocketAddr;

use serde::Deserialize;

use crate::{HealthConfig, OauthConfig, TlsServerConfig};

/// HTTP server configuration settings.
#[derive(Default, Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the server should listen on.
    pub listen_address: Option<SocketAddr>,
    /// Whether requests must carry a valid bearer token before being proxied.
    #[serde(default)]
    pub auth_mode: AuthMode,
    /// TLS configuration for secure connections.
    pub tls: Option<TlsServerConfig>,
    /// Health endpoint configuration.
    #[serde(default)]
    pub health: HealthConfig,
    /// OAuth2 configuration
    pub oauth: Option<OauthConfig>,
}

impl ServerConfig {
    /// Returns whether bearer tokens are enforced on proxied routes.
    pub fn enforces_auth(&self) -> bool {
        self.auth_mode == AuthMode::Enforced
    }
}

/// Authorization mode of the gateway.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Every proxied request must present a valid bearer token.
    #[default]
    Enforced,
    /// Requests are proxied without any token validation. Meant for local development.
    Anonymous,
}
