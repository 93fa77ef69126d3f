use std::time::Duration;

/// Failures of the supervised process.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SupervisorError {
    /// The process could not be launched or never accepted connections.
    #[error("process failed to start: {0}")]
    ProcessStartFailed(String),
    /// The process exited after it was confirmed running.
    #[error("process crashed: {0}")]
    ProcessCrashed(String),
    /// The restart policy gave up. Escalates to a host failure.
    #[error("giving up after {restarts} restarts, last failure: {last_error}")]
    RestartsExhausted {
        /// Restarts attempted before giving up.
        restarts: u32,
        /// The failure that ended supervision.
        last_error: Box<SupervisorError>,
    },
    /// The supervisor task ended without reporting a failure.
    #[error("supervisor terminated")]
    Terminated,
}

impl SupervisorError {
    pub(crate) fn startup_deadline(address: std::net::SocketAddr, timeout: Duration) -> Self {
        Self::ProcessStartFailed(format!("{address} did not accept connections within {timeout:?}"))
    }
}
