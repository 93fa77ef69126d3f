use crate::SupervisorError;

/// Lifecycle of the supervised process.
///
/// `Starting → Running → (Crashed → Starting)* → Stopped`. A launch that never
/// becomes ready goes from `Starting` straight to `Crashed`. `Stopped` is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Launched, waiting for the port to accept connections.
    Starting,
    /// Confirmed listening. The only state in which traffic is forwarded.
    Running,
    /// Exited or failed readiness, a restart may follow.
    Crashed,
    /// Shut down on request or after the restart policy gave up.
    Stopped,
}

impl Lifecycle {
    /// Lowercase name used in logs and health reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Lifecycle::Starting => "starting",
            Lifecycle::Running => "running",
            Lifecycle::Crashed => "crashed",
            Lifecycle::Stopped => "stopped",
        }
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the supervised process, published by the supervisor on every transition.
#[derive(Debug, Clone)]
pub struct ProcessStatus {
    /// Current lifecycle state.
    pub lifecycle: Lifecycle,
    /// Operating system identifier of the current process, if one is alive.
    pub pid: Option<u32>,
    /// Restarts performed since the supervisor started.
    pub restart_count: u32,
    /// When the current (or last) process was launched.
    pub last_start: Option<jiff::Timestamp>,
    /// Incremented every time a process becomes `Running`. Lets readers tell two
    /// consecutive runs apart even if they never observed the crash in between.
    pub generation: u64,
    /// The most recent failure.
    pub last_error: Option<SupervisorError>,
}

impl Default for ProcessStatus {
    fn default() -> Self {
        Self {
            lifecycle: Lifecycle::Starting,
            pid: None,
            restart_count: 0,
            last_start: None,
            generation: 0,
            last_error: None,
        }
    }
}

impl ProcessStatus {
    /// Whether traffic may be forwarded.
    pub fn is_running(&self) -> bool {
        self.lifecycle == Lifecycle::Running
    }
}
