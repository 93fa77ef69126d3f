//! OAuth2 resource-server configuration: where to fetch signing keys, what to expect in
//! tokens, and what to publish in the protected resource metadata document.

use std::{collections::BTreeMap, time::Duration};

use duration_str::{deserialize_duration, deserialize_option_duration};
use serde::Deserialize;
use url::Url;

/// Well-known path of the protected resource metadata document (RFC 9728).
pub const PROTECTED_RESOURCE_METADATA_PATH: &str = "/.well-known/oauth-protected-resource";

/// OAuth2 configuration for authentication.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OauthConfig {
    /// The JWKs URL of the OAuth2 provider.
    pub url: Url,
    /// How long a fetched key set stays fresh. Without a value the key set is only
    /// refetched when a token signed by an unknown key shows up.
    #[serde(default, deserialize_with = "deserialize_option_duration")]
    pub poll_interval: Option<Duration>,
    /// Upper bound for a single key set fetch.
    #[serde(default = "default_fetch_timeout", deserialize_with = "deserialize_duration")]
    pub fetch_timeout: Duration,
    /// Minimum time between two forced refreshes triggered by unknown keys.
    #[serde(default = "default_min_refresh_interval", deserialize_with = "deserialize_duration")]
    pub min_refresh_interval: Duration,
    /// How long an expired key set may still be used when the provider cannot be reached.
    #[serde(default = "default_stale_grace", deserialize_with = "deserialize_duration")]
    pub stale_grace: Duration,
    /// Tolerated clock difference to the authorization server when checking `exp` and
    /// `nbf`. Zero by default: a token is expired the moment its `exp` has passed.
    #[serde(default, deserialize_with = "deserialize_duration")]
    pub clock_skew: Duration,
    /// Expected issuer (iss claim) for token validation. Required when authorization is
    /// enforced.
    pub expected_issuer: Option<String>,
    /// Expected audience (aud claim) for token validation. Required when authorization
    /// is enforced.
    pub expected_audience: Option<String>,
    /// Scopes every proxied request must carry.
    #[serde(default)]
    pub required_scopes: Vec<String>,
    /// Additional scopes keyed by path prefix. The longest matching prefix applies.
    #[serde(default)]
    pub path_scopes: BTreeMap<String, Vec<String>>,
    /// Protected resource configuration.
    pub protected_resource: ProtectedResourceConfig,
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_min_refresh_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_stale_grace() -> Duration {
    Duration::from_secs(3600)
}

/// Configuration for OAuth2 protected resources.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProtectedResourceConfig {
    /// The URL of the protected resource.
    pub resource: Url,
    /// List of authorization server URLs.
    pub authorization_servers: Vec<Url>,
    /// Scopes advertised in the metadata document.
    pub scopes_supported: Option<Vec<String>>,
    /// Human-readable name of the resource.
    pub resource_name: Option<String>,
    /// Link to developer documentation for the resource.
    pub resource_documentation: Option<Url>,
}

impl ProtectedResourceConfig {
    /// Path of the metadata document for this resource. A resource with a path component
    /// gets it appended after the well-known prefix.
    pub fn metadata_path(&self) -> String {
        match self.resource.path().trim_end_matches('/') {
            "" => PROTECTED_RESOURCE_METADATA_PATH.to_string(),
            path => format!("{PROTECTED_RESOURCE_METADATA_PATH}{path}"),
        }
    }

    /// Absolute URL of the metadata document, referenced from `WWW-Authenticate` challenges.
    pub fn metadata_url(&self) -> Url {
        let mut url = self.resource.clone();
        url.set_path(&self.metadata_path());
        url.set_query(None);
        url.set_fragment(None);
        url
    }
}
