use std::{fmt::Write, path::Path, str::FromStr};

use anyhow::bail;
use indoc::indoc;
use serde::Deserialize;
use serde_dynamic_string::DynamicString;
use toml::Value;

use crate::{AuthMode, Config};

pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)
        .map_err(|err| anyhow::anyhow!("Failed to read configuration file {}: {err}", path.display()))?;

    let config = parse(&content)?;
    log::debug!("Loaded configuration from {}", path.display());

    Ok(config)
}

pub(crate) fn parse(content: &str) -> anyhow::Result<Config> {
    let mut raw_config: Value = toml::from_str(content)?;
    expand_dynamic_strings(&mut Vec::new(), &mut raw_config)?;

    let config = Config::deserialize(raw_config)?;
    validate(&config)?;

    Ok(config)
}

pub(crate) fn validate(config: &Config) -> anyhow::Result<()> {
    validate_has_process(config)?;
    validate_auth(config)?;

    Ok(())
}

fn validate_has_process(config: &Config) -> anyhow::Result<()> {
    let Some(process) = &config.process else {
        bail!(indoc! {r#"
            No process configured. Gatehouse requires an MCP server process to supervise and proxy to.

            Example configuration:

              [process]
              executable = "python"
              args = ["server.py"]
              port = 8081
        "#});
    };

    if process.executable.as_os_str().is_empty() {
        bail!("The process executable must not be empty");
    }

    if process.port == 0 {
        bail!("The process port must be a fixed port, 0 is not allowed");
    }

    if process.startup.initial_backoff > process.startup.max_backoff {
        bail!("process.startup.initial_backoff must not exceed process.startup.max_backoff");
    }

    if process.restart.backoff_min > process.restart.backoff_max {
        bail!("process.restart.backoff_min must not exceed process.restart.backoff_max");
    }

    if let Some(name) = &process.port_env
        && (name.is_empty() || name.contains('='))
    {
        bail!("process.port_env must be a valid environment variable name, got '{name}'");
    }

    if config.server.listen_address == Some(process.address()) {
        bail!(
            "The gateway and the process cannot both listen on {}",
            process.address()
        );
    }

    Ok(())
}

fn validate_auth(config: &Config) -> anyhow::Result<()> {
    let Some(oauth) = &config.server.oauth else {
        if config.server.auth_mode == AuthMode::Enforced {
            bail!(indoc! {r#"
                Authorization is enforced but no OAuth2 configuration was found.

                Either configure the resource server:

                  [server.oauth]
                  url = "https://auth.example.com/.well-known/jwks.json"
                  expected_issuer = "https://auth.example.com"
                  expected_audience = "https://mcp.example.com"

                  [server.oauth.protected_resource]
                  resource = "https://mcp.example.com"
                  authorization_servers = ["https://auth.example.com"]

                Or explicitly run without authorization:

                  [server]
                  auth_mode = "anonymous"
            "#});
        }

        return Ok(());
    };

    if oauth.protected_resource.authorization_servers.is_empty() {
        bail!("server.oauth.protected_resource.authorization_servers must list at least one authorization server");
    }

    if let Some(path) = oauth.path_scopes.keys().find(|path| !path.starts_with('/')) {
        bail!("Path scope keys must start with '/', got '{path}'");
    }

    // Without both checks any token signed by the provider would be accepted, including
    // tokens minted for other resources.
    if config.server.enforces_auth() {
        if oauth.expected_issuer.is_none() {
            bail!("server.oauth.expected_issuer is required when authorization is enforced");
        }

        if oauth.expected_audience.is_none() {
            bail!("server.oauth.expected_audience is required when authorization is enforced");
        }
    }

    Ok(())
}

fn expand_dynamic_strings<'a>(path: &mut Vec<Result<&'a str, usize>>, value: &'a mut Value) -> anyhow::Result<()> {
    match value {
        Value::String(s) => match DynamicString::<String>::from_str(s) {
            Ok(out) => *s = out.into_inner(),
            Err(err) => {
                let mut p = String::new();
                for segment in path {
                    match segment {
                        Ok(s) => {
                            p.push_str(s);
                            p.push('.');
                        }
                        Err(i) => write!(p, "[{i}]")?,
                    }
                }
                if p.ends_with('.') {
                    p.pop();
                }

                bail!("Failed to expand dynamic string at path '{p}': {err}");
            }
        },
        Value::Array(values) => {
            for (i, value) in values.iter_mut().enumerate() {
                path.push(Err(i));
                expand_dynamic_strings(path, value)?;
                path.pop();
            }
        }
        Value::Table(map) => {
            for (key, value) in map {
                path.push(Ok(key.as_str()));
                expand_dynamic_strings(path, value)?;
                path.pop();
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }

    Ok(())
}
