//! Configuration of the supervised MCP server process.

use std::{
    collections::BTreeMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use duration_str::deserialize_duration;
use serde::Deserialize;

/// The external MCP server the gateway launches and proxies to.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProcessConfig {
    /// Path or name of the executable to launch.
    pub executable: PathBuf,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Address the process binds. Defaults to the loopback interface.
    #[serde(default = "default_host")]
    pub host: IpAddr,
    /// Port the process listens on.
    pub port: u16,
    /// Name of an environment variable set to `port` when launching, e.g. `PORT`.
    pub port_env: Option<String>,
    /// Environment variables for the process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Working directory for the process.
    pub cwd: Option<PathBuf>,
    /// Where the process standard output goes.
    #[serde(default)]
    pub stdout: StdioTarget,
    /// Where the process standard error goes.
    #[serde(default)]
    pub stderr: StdioTarget,
    /// Readiness confirmation after launch.
    #[serde(default)]
    pub startup: StartupConfig,
    /// Restart policy after the process exits.
    #[serde(default)]
    pub restart: RestartConfig,
    /// Termination behavior on gateway shutdown.
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

impl ProcessConfig {
    /// Socket address the process is expected to listen on.
    pub fn address(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Output target of a process standard stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum StdioTarget {
    /// Inherit from the gateway or discard.
    Simple(StdioTargetType),
    /// Append to a file.
    File {
        /// Path of the file, created if missing.
        file: PathBuf,
    },
}

impl Default for StdioTarget {
    fn default() -> Self {
        Self::Simple(StdioTargetType::Inherit)
    }
}

/// Simple standard stream targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StdioTargetType {
    /// Share the gateway's stream.
    Inherit,
    /// Discard the output.
    Null,
}

/// How the supervisor confirms the process is listening.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StartupConfig {
    /// Deadline for the port to accept connections after launch.
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    /// Delay before the second connection attempt. Doubles after every failed attempt.
    #[serde(deserialize_with = "deserialize_duration")]
    pub initial_backoff: Duration,
    /// Upper bound of the delay between connection attempts.
    #[serde(deserialize_with = "deserialize_duration")]
    pub max_backoff: Duration,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            initial_backoff: Duration::from_millis(50),
            max_backoff: Duration::from_secs(1),
        }
    }
}

/// Restart policy for a crashed process.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RestartConfig {
    /// Whether crashed processes are restarted at all.
    pub enabled: bool,
    /// Consecutive failed runs tolerated before giving up.
    pub max_restarts: u32,
    /// Delay before the first restart.
    #[serde(deserialize_with = "deserialize_duration")]
    pub backoff_min: Duration,
    /// Upper bound of the restart delay.
    #[serde(deserialize_with = "deserialize_duration")]
    pub backoff_max: Duration,
    /// A run lasting at least this long resets the consecutive failure count.
    #[serde(deserialize_with = "deserialize_duration")]
    pub reset_after: Duration,
}

impl Default for RestartConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_restarts: 5,
            backoff_min: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            reset_after: Duration::from_secs(60),
        }
    }
}

/// Termination behavior of the process.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ShutdownConfig {
    /// Time between the graceful termination signal and a forced kill.
    #[serde(deserialize_with = "deserialize_duration")]
    pub grace_period: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(10),
        }
    }
}
