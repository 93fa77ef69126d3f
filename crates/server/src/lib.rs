//! Gatehouse server library.
//!
//! Supervises the MCP server process and serves the authorization gateway in front of
//! it, either for the binary or for the integration tests.

#![deny(missing_docs)]

mod auth;
mod error;
mod health;
mod proxy;
mod tracing;
mod well_known;

use std::net::SocketAddr;

use anyhow::anyhow;
use auth::AuthLayer;
use axum::{Router, routing::any};
use axum_server::tls_rustls::RustlsConfig;
use config::{Config, TlsServerConfig};
use proxy::{Proxy, ProxyOptions};
use supervisor::Supervisor;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::TracingLayer;

pub use auth::claims::TokenClaims;

/// Configuration for serving Gatehouse.
pub struct ServeConfig {
    /// The socket address (IP and port) the server will bind to
    pub listen_address: SocketAddr,
    /// The deserialized Gatehouse TOML configuration.
    pub config: Config,
    /// Cancelled to shut the gateway down. The gateway cancels it too when the
    /// supervised process fails for good.
    pub shutdown: CancellationToken,
}

/// Starts the MCP server process and serves the gateway until shutdown.
///
/// Returns once the HTTP server has drained and the process has been terminated. An
/// error is returned when startup fails or when the process could not be kept alive.
pub async fn serve(
    ServeConfig {
        listen_address,
        config,
        shutdown,
    }: ServeConfig,
) -> anyhow::Result<()> {
    config.validate()?;

    let process = config
        .process
        .clone()
        .ok_or_else(|| anyhow!("No process configured"))?;

    let grace_period = process.shutdown.grace_period;

    log::info!("Starting MCP server process {}", process.executable.display());

    let supervisor = Supervisor::start(process)
        .await
        .map_err(|e| anyhow!("Failed to start the MCP server process: {e}"))?;

    let result = run(listen_address, &config, &supervisor, shutdown).await;

    supervisor.stop(grace_period).await;

    result
}

async fn run(
    listen_address: SocketAddr,
    config: &Config,
    supervisor: &Supervisor,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let app = router(config, supervisor, shutdown.clone())?;

    let listener = TcpListener::bind(listen_address)
        .await
        .map_err(|e| anyhow!("Failed to bind to {listen_address}: {e}"))?;

    let scheme = if config.server.tls.is_some() { "https" } else { "http" };
    log::info!("Gatehouse listening at {scheme}://{listen_address}");

    let server = serve_http(listener, app, config.server.tls.clone(), shutdown.clone());
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => result,
        error = supervisor.wait_for_fatal() => {
            log::error!("The MCP server process could not be kept running: {error}");

            shutdown.cancel();

            if let Err(e) = server.await {
                log::warn!("HTTP server did not shut down cleanly: {e}");
            }

            Err(anyhow!("The MCP server process could not be kept running: {error}"))
        }
    }
}

fn router(config: &Config, supervisor: &Supervisor, shutdown: CancellationToken) -> anyhow::Result<Router> {
    let mut app = Router::new();

    let challenge_url = match &config.server.oauth {
        Some(oauth) => {
            // The metadata document stays public in both modes.
            app = app.merge(well_known::router(&oauth.protected_resource)?);

            config
                .server
                .enforces_auth()
                .then(|| oauth.protected_resource.metadata_url())
        }
        None => None,
    };

    let proxy = Proxy::new(
        &config.proxy,
        supervisor.handle(),
        ProxyOptions {
            tls: config.server.tls.is_some(),
            challenge_url,
            shutdown: shutdown.clone(),
        },
    )?;

    let mut proxied = Router::new()
        .route("/", any(proxy::forward))
        .route("/{*path}", any(proxy::forward))
        .with_state(proxy);

    match &config.server.oauth {
        Some(oauth) if config.server.enforces_auth() => {
            proxied = proxied.layer(AuthLayer::new(oauth.clone())?);
        }
        _ => {
            log::warn!("Authorization is disabled, every request is forwarded to the MCP server process");
        }
    }

    app = app.merge(proxied);

    if config.server.health.enabled {
        let health_router = health::router(&config.server.health, supervisor.handle());

        match config.server.health.listen {
            Some(listen) => {
                let tls = config.server.tls.clone();

                tokio::spawn(async move {
                    if let Err(e) = health::bind_health_endpoint(listen, tls, health_router, shutdown).await {
                        log::error!("{e}");
                    }
                });
            }
            None => {
                log::info!("Health check endpoint exposed at {}", config.server.health.path);
                app = app.merge(health_router);
            }
        }
    }

    Ok(app.layer(TracingLayer))
}

async fn serve_http(
    listener: TcpListener,
    app: Router,
    tls: Option<TlsServerConfig>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    match tls {
        Some(tls_config) => {
            let rustls_config = RustlsConfig::from_pem_file(&tls_config.certificate, &tls_config.key)
                .await
                .map_err(|e| anyhow!("Failed to load TLS certificate and key: {e}"))?;

            let handle = axum_server::Handle::new();

            tokio::spawn({
                let handle = handle.clone();

                async move {
                    shutdown.cancelled().await;
                    handle.graceful_shutdown(None);
                }
            });

            axum_server::from_tcp_rustls(listener.into_std()?, rustls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await
                .map_err(|e| anyhow!("Failed to start HTTPS server: {e}"))?;
        }
        None => {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown.cancelled_owned())
                .await
                .map_err(|e| anyhow!("Failed to start HTTP server: {}", e))?;
        }
    }

    log::debug!("HTTP server stopped");

    Ok(())
}
