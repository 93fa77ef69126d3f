//! Reverse proxy to the supervised MCP server process.

mod body;
mod headers;

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::{Request, State},
    response::IntoResponse,
};
use bytes::Bytes;
use config::ProxyConfig;
use fastrace::{Span, future::FutureExt as _};
use futures_util::{StreamExt, stream};
use http::{Response, StatusCode};
use http_body::Body as _;
use supervisor::SupervisorHandle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    auth::{challenge::challenge, claims::TokenClaims, error::AuthError},
    error::ErrorResponse,
};
use body::UpstreamBody;
use headers::Forwarding;

/// Chunks of a request body buffered between the client and the upstream connection.
const REQUEST_BODY_BUFFER: usize = 8;

/// A request failing this close to the process leaving `Running` failed because of it.
const EXIT_SETTLE_TIME: Duration = Duration::from_millis(250);

/// Shared state of the proxy handler.
pub(crate) struct Proxy {
    client: reqwest::Client,
    upstream: SupervisorHandle,
    idle_timeout: Duration,
    forward_authorization: bool,
    tls: bool,
    /// Set when tokens are enforced. An upstream 401 is then answered with our own challenge.
    challenge_url: Option<Url>,
    shutdown: CancellationToken,
}

/// How the gateway reaches the upstream process.
pub(crate) struct ProxyOptions {
    pub tls: bool,
    pub challenge_url: Option<Url>,
    pub shutdown: CancellationToken,
}

impl Proxy {
    pub fn new(config: &ProxyConfig, upstream: SupervisorHandle, options: ProxyOptions) -> anyhow::Result<Arc<Self>> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create the upstream client: {e}"))?;

        log::debug!("Proxying requests to http://{}", upstream.address());

        Ok(Arc::new(Self {
            client,
            upstream,
            idle_timeout: config.idle_timeout,
            forward_authorization: config.forward_authorization,
            tls: options.tls,
            challenge_url: options.challenge_url,
            shutdown: options.shutdown,
        }))
    }

    async fn send(&self, request: Request) -> Result<Response<Body>, ProxyError> {
        let Some(generation) = self.upstream.running_generation() else {
            return Err(ProxyError::UpstreamUnavailable);
        };

        let (parts, body) = request.into_parts();

        let path = parts.uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
        let url = format!("http://{}{path}", self.upstream.address());

        let headers = headers::upstream_request_headers(
            parts.headers,
            Forwarding {
                forward_authorization: self.forward_authorization,
                tls: self.tls,
                claims: parts.extensions.get::<TokenClaims>(),
            },
        );

        let request = self
            .client
            .request(parts.method.clone(), url)
            .headers(headers)
            .body(request_body(body));

        // The idle timeout also bounds the wait for the response head.
        let result = tokio::select! {
            result = request.send() => result,
            _ = self.upstream.left_running(generation) => return Err(ProxyError::UpstreamUnavailable),
            _ = tokio::time::sleep(self.idle_timeout) => return Err(ProxyError::UpstreamTimeout(self.idle_timeout)),
        };

        let response = match result {
            Ok(response) => response,
            Err(error) => return Err(self.request_failed(error, generation).await),
        };

        if response.status() == StatusCode::UNAUTHORIZED
            && let Some(url) = &self.challenge_url
        {
            log::debug!(kind = AuthError::TokenRejected.kind(); "Upstream rejected the token for {} {}", parts.method, parts.uri.path());
            return Ok(challenge(&AuthError::TokenRejected, url));
        }

        Ok(self.stream_response(response, generation))
    }

    /// A dying process drops its connections slightly before the supervisor notices the
    /// exit. Such failures are reported as unavailability, not as a bad gateway.
    async fn request_failed(&self, error: reqwest::Error, generation: u64) -> ProxyError {
        let error = ProxyError::from_request(error);

        if matches!(error, ProxyError::UpstreamUnavailable) {
            return error;
        }

        match tokio::time::timeout(EXIT_SETTLE_TIME, self.upstream.left_running(generation)).await {
            Ok(()) => ProxyError::UpstreamUnavailable,
            Err(_) => error,
        }
    }

    fn stream_response(&self, response: reqwest::Response, generation: u64) -> Response<Body> {
        let mut builder = Response::builder().status(response.status());

        if let Some(map) = builder.headers_mut() {
            map.extend(response.headers().clone());
            headers::strip_hop_by_hop(map);
        }

        let upstream = self.upstream.clone();
        let shutdown = self.shutdown.clone();

        let interrupted = async move {
            tokio::select! {
                _ = upstream.left_running(generation) => {}
                _ = shutdown.cancelled() => {}
            }
        };

        let body = UpstreamBody::new(response.bytes_stream().boxed(), self.idle_timeout, interrupted);

        builder
            .body(Body::from_stream(body))
            .unwrap_or_else(|_| ProxyError::UpstreamFailed.into_response())
    }
}

/// Handler for every route not served by the gateway itself.
pub(crate) async fn forward(State(proxy): State<Arc<Proxy>>, request: Request) -> Response<Body> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let span = Span::enter_with_local_parent("upstream request");

    match proxy.send(request).in_span(span).await {
        Ok(response) => response,
        Err(error) => {
            log::warn!(kind = error.kind(); "Failed to forward {method} {path}: {error}");
            error.into_response()
        }
    }
}

/// Streams the client's request body upstream. The stream is pumped through a channel,
/// which also ends the upload when the upstream request is dropped.
fn request_body(body: Body) -> reqwest::Body {
    if body.size_hint().exact() == Some(0) {
        return reqwest::Body::from(Bytes::new());
    }

    let (sender, mut receiver) = mpsc::channel::<Result<Bytes, axum::Error>>(REQUEST_BODY_BUFFER);

    tokio::spawn(async move {
        let mut chunks = body.into_data_stream();

        while let Some(chunk) = chunks.next().await {
            if sender.send(chunk).await.is_err() {
                break;
            }
        }
    });

    reqwest::Body::wrap_stream(stream::poll_fn(move |cx| receiver.poll_recv(cx)))
}

/// Failures of the proxy itself. Errors inside the upstream's responses are passed
/// through unchanged.
#[derive(Debug, thiserror::Error)]
pub(crate) enum ProxyError {
    #[error("the MCP server process is not available")]
    UpstreamUnavailable,
    #[error("the MCP server process did not answer")]
    UpstreamFailed,
    #[error("the MCP server process did not respond within {0:?}")]
    UpstreamTimeout(Duration),
}

impl ProxyError {
    fn from_request(error: reqwest::Error) -> Self {
        if error.is_connect() {
            log::debug!("Connecting to the upstream process failed: {error}");
            ProxyError::UpstreamUnavailable
        } else {
            log::debug!("Upstream request failed: {error}");
            ProxyError::UpstreamFailed
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::UpstreamUnavailable => "UpstreamUnavailable",
            ProxyError::UpstreamFailed => "UpstreamFailed",
            ProxyError::UpstreamTimeout(_) => "UpstreamTimeout",
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ProxyError::UpstreamUnavailable => "upstream_unavailable",
            ProxyError::UpstreamFailed => "upstream_failed",
            ProxyError::UpstreamTimeout(_) => "upstream_timeout",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ProxyError::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::UpstreamFailed => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        ErrorResponse::new(self.code(), self.to_string()).into_response(self.status())
    }
}
