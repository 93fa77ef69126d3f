//! Gatehouse configuration structures to map the gatehouse.toml configuration.

#![deny(missing_docs)]

mod health;
mod loader;
mod oauth;
mod process;
mod proxy;
mod server;
mod telemetry;
mod tls;

use std::path::Path;

pub use health::HealthConfig;
pub use oauth::{OauthConfig, PROTECTED_RESOURCE_METADATA_PATH, ProtectedResourceConfig};
pub use process::{ProcessConfig, RestartConfig, ShutdownConfig, StartupConfig, StdioTarget, StdioTargetType};
pub use proxy::ProxyConfig;
use serde::Deserialize;
pub use server::{AuthMode, ServerConfig};
pub use telemetry::{ExportersConfig, OtlpExporterConfig, OtlpProtocol, TelemetryConfig, TracingConfig};
pub use tls::TlsServerConfig;

/// Main configuration structure for the Gatehouse application.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// HTTP server configuration settings.
    #[serde(default)]
    pub server: ServerConfig,
    /// The supervised MCP server process.
    pub process: Option<ProcessConfig>,
    /// Reverse proxy settings.
    #[serde(default)]
    pub proxy: ProxyConfig,
    /// Telemetry configuration settings.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Checks the cross-field rules a deserialized configuration must satisfy before serving.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate(self)
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use crate::Config;

    #[test]
    fn all_values() {
        let config = indoc! {r#"
            [server]
            listen_address = "0.0.0.0:8080"
            auth_mode = "anonymous"

            [server.health]
            path = "/healthz"
            require_upstream = false

            [process]
            executable = "python"
            args = ["delfos_mcp.py"]
            port = 8081

            [proxy]
            connect_timeout = "1s"
            idle_timeout = "30m"
            forward_authorization = false
        "#};

        let config: Config = toml::from_str(config).unwrap();

        insta::assert_debug_snapshot!(&config, @r#"
        Config {
            server: ServerConfig {
                listen_address: Some(
                    0.0.0.0:8080,
                ),
                auth_mode: Anonymous,
                tls: None,
                health: HealthConfig {
                    enabled: true,
                    listen: None,
                    path: "/healthz",
                    require_upstream: false,
                },
                oauth: None,
            },
            process: Some(
                ProcessConfig {
                    executable: "python",
                    args: [
                        "delfos_mcp.py",
                    ],
                    host: 127.0.0.1,
                    port: 8081,
                    port_env: None,
                    env: {},
                    cwd: None,
                    stdout: Simple(
                        Inherit,
                    ),
                    stderr: Simple(
                        Inherit,
                    ),
                    startup: StartupConfig {
                        timeout: 30s,
                        initial_backoff: 50ms,
                        max_backoff: 1s,
                    },
                    restart: RestartConfig {
                        enabled: true,
                        max_restarts: 5,
                        backoff_min: 500ms,
                        backoff_max: 30s,
                        reset_after: 60s,
                    },
                    shutdown: ShutdownConfig {
                        grace_period: 10s,
                    },
                },
            ),
            proxy: ProxyConfig {
                connect_timeout: 1s,
                idle_timeout: 1800s,
                forward_authorization: false,
            },
            telemetry: TelemetryConfig {
                service_name: None,
                resource_attributes: {},
                exporters: ExportersConfig {
                    otlp: OtlpExporterConfig {
                        enabled: false,
                        endpoint: Url {
                            scheme: "http",
                            cannot_be_a_base: false,
                            username: "",
                            password: None,
                            host: Some(
                                Domain(
                                    "localhost",
                                ),
                            ),
                            port: Some(
                                4317,
                            ),
                            path: "/",
                            query: None,
                            fragment: None,
                        },
                        protocol: Grpc,
                        timeout: 60s,
                        report_interval: 5s,
                    },
                },
                tracing: TracingConfig {
                    enabled: false,
                    exporters: None,
                },
            },
        }
        "#);
    }

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();

        insta::assert_debug_snapshot!(&config.server, @r#"
        ServerConfig {
            listen_address: None,
            auth_mode: Enforced,
            tls: None,
            health: HealthConfig {
                enabled: true,
                listen: None,
                path: "/health",
                require_upstream: true,
            },
            oauth: None,
        }
        "#);

        insta::assert_debug_snapshot!(&config.proxy, @r#"
        ProxyConfig {
            connect_timeout: 5s,
            idle_timeout: 300s,
            forward_authorization: true,
        }
        "#);

        assert!(config.process.is_none());
    }

    #[test]
    fn tls_config() {
        let config = indoc! {r#"
            [server.tls]
            certificate = "/etc/gatehouse/cert.pem"
            key = "/etc/gatehouse/key.pem"
        "#};

        let config: Config = toml::from_str(config).unwrap();

        insta::assert_debug_snapshot!(&config.server.tls, @r#"
        Some(
            TlsServerConfig {
                certificate: "/etc/gatehouse/cert.pem",
                key: "/etc/gatehouse/key.pem",
            },
        )
        "#);
    }

    #[test]
    fn unknown_section_fails() {
        let config = indoc! {r#"
            [mcp]
            enabled = true
        "#};

        let result: Result<Config, _> = toml::from_str(config);
        assert!(result.is_err());
    }
}
