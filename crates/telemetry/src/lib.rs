//! Telemetry library for Gatehouse
//!
//! Exports request spans recorded with fastrace to an OpenTelemetry collector.

mod tracing;

use config::TelemetryConfig;

pub use tracing::TracingGuard;

/// Initialize telemetry with the given configuration
///
/// Returns a guard that should be kept alive for the duration of the application.
/// Pending spans are flushed when the guard is dropped.
pub async fn init(config: &TelemetryConfig) -> anyhow::Result<TracingGuard> {
    tracing::init_tracing(config).await
}
