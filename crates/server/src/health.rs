use std::net::SocketAddr;

use anyhow::anyhow;
use axum::{Json, Router, extract::State, routing::get};
use config::{HealthConfig, TlsServerConfig};
use http::StatusCode;
use serde::Serialize;
use supervisor::{ProcessStatus, SupervisorHandle};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum HealthState {
    /// The gateway serves traffic.
    Healthy,
    /// The gateway cannot forward traffic right now.
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthReport {
    status: HealthState,
    upstream: UpstreamReport,
}

#[derive(Debug, Serialize)]
struct UpstreamReport {
    lifecycle: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pid: Option<u32>,
    restart_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
}

#[derive(Clone)]
pub(crate) struct HealthContext {
    upstream: SupervisorHandle,
    require_upstream: bool,
}

/// Health of the gateway given the state of the supervised process.
pub(crate) fn report(status: &ProcessStatus, require_upstream: bool) -> (StatusCode, HealthReport) {
    let healthy = status.is_running() || !require_upstream;

    let report = HealthReport {
        status: if healthy {
            HealthState::Healthy
        } else {
            HealthState::Unhealthy
        },
        upstream: UpstreamReport {
            lifecycle: status.lifecycle.as_str(),
            pid: status.pid,
            restart_count: status.restart_count,
            last_start: status.last_start.map(|at| at.to_string()),
            last_error: status.last_error.as_ref().map(ToString::to_string),
        },
    };

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (code, report)
}

async fn health(State(state): State<HealthContext>) -> (StatusCode, Json<HealthReport>) {
    let (code, report) = report(&state.upstream.status(), state.require_upstream);
    (code, Json(report))
}

/// Router serving the health endpoint at the configured path.
pub(crate) fn router(config: &HealthConfig, upstream: SupervisorHandle) -> Router {
    let state = HealthContext {
        upstream,
        require_upstream: config.require_upstream,
    };

    Router::new().route(&config.path, get(health)).with_state(state)
}

/// Binds the health check endpoint to its own address, until `shutdown` is cancelled.
pub(super) async fn bind_health_endpoint(
    addr: SocketAddr,
    tls_config: Option<TlsServerConfig>,
    app: Router,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let scheme = if tls_config.is_some() { "https" } else { "http" };
    let app = app.into_make_service();

    let handle = axum_server::Handle::new();

    tokio::spawn({
        let handle = handle.clone();
        async move {
            shutdown.cancelled().await;
            handle.graceful_shutdown(None);
        }
    });

    log::info!("Health check endpoint exposed at {scheme}://{addr}");

    match tls_config {
        Some(tls) => {
            let rustls_config = axum_server::tls_rustls::RustlsConfig::from_pem_file(&tls.certificate, &tls.key)
                .await
                .map_err(|e| anyhow!("Failed to load TLS certificate and key: {}", e))?;

            axum_server::bind_rustls(addr, rustls_config)
                .handle(handle)
                .serve(app)
                .await
                .map_err(|e| anyhow!("Failed to start HTTP server in the health endpoint: {e}"))?;
        }
        None => axum_server::bind(addr)
            .handle(handle)
            .serve(app)
            .await
            .map_err(|e| anyhow!("Failed to start HTTP server in the health endpoint: {e}"))?,
    }

    Ok(())
}
