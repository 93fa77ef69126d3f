//! HTTP tracing middleware
//!
//! Opens a root span for every request, continuing the caller's trace when a W3C
//! `traceparent` header is present.

use std::{
    fmt::Display,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use axum::{body::Body, extract::MatchedPath};
use fastrace::{
    Span,
    future::FutureExt,
    prelude::{LocalSpan, SpanContext},
};
use http::{HeaderMap, Request, Response};
use tower::Layer;

/// Layer for HTTP tracing
#[derive(Clone, Default)]
pub struct TracingLayer;

impl<Service> Layer<Service> for TracingLayer
where
    Service: Send + Clone,
{
    type Service = TracingService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        TracingService { next }
    }
}

/// Service that creates traces for HTTP requests
#[derive(Clone)]
pub struct TracingService<Service> {
    next: Service,
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for TracingService<Service>
where
    Service: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
    Service::Error: Display + 'static,
    ReqBody: http_body::Body + Send + 'static,
{
    type Response = Response<Body>;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let route = req
            .extensions()
            .get::<MatchedPath>()
            .map(|matched_path| matched_path.as_str().to_owned())
            .unwrap_or_else(|| req.uri().path().to_owned());

        let method = req.method().to_string();
        let path = req.uri().path().to_owned();

        let host = req
            .headers()
            .get("host")
            .and_then(|h| h.to_str().ok())
            .map(|s| s.to_string());

        let parent = extract_trace_context(req.headers()).unwrap_or_else(SpanContext::random);
        let root = Span::root(format!("{method} {route}"), parent);

        root.add_property(|| ("http.request.method", method.clone()));
        root.add_property(|| ("http.route", route.clone()));
        root.add_property(|| ("url.path", path));

        if let Some(host) = host {
            root.add_property(|| ("server.address", host));
        }

        let mut next = self.next.clone();

        let fut = async move {
            let response = next.call(req).await?;

            let status = response.status();
            LocalSpan::add_property(|| ("http.response.status_code", status.as_u16().to_string()));

            if status.is_client_error() || status.is_server_error() {
                LocalSpan::add_property(|| ("error", "true"));
            }

            Ok(response)
        };

        Box::pin(fut.in_span(root))
    }
}

/// Extract trace context from HTTP headers
fn extract_trace_context(headers: &HeaderMap) -> Option<SpanContext> {
    let traceparent = headers.get("traceparent")?.to_str().ok()?;
    SpanContext::decode_w3c_traceparent(traceparent)
}
