//! Reverse proxy settings for traffic forwarded to the supervised process.

use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;

/// Reverse proxy configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    /// Upper bound for establishing the upstream connection.
    #[serde(deserialize_with = "deserialize_duration")]
    pub connect_timeout: Duration,
    /// Maximum wait for the response head, and maximum silence on a response stream
    /// before it is closed. Long-lived streams stay open as long as data keeps flowing.
    #[serde(deserialize_with = "deserialize_duration")]
    pub idle_timeout: Duration,
    /// Pass the client's `Authorization` header to the upstream process.
    pub forward_authorization: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(300),
            forward_authorization: true,
        }
    }
}
