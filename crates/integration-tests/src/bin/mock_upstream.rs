//! A minimal MCP server stand-in, launched by the gateway under test.
//!
//! Binds the port given in the `PORT` environment variable.

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures_util::{StreamExt, stream};
use serde::Deserialize;
use serde_json::json;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let port: u16 = std::env::var("PORT")?.parse()?;
    let address = SocketAddr::from(([127, 0, 0, 1], port));

    let app = Router::new()
        .route("/mcp", post(mcp))
        .route("/sse", get(sse))
        .route("/silent-stream", get(silent_stream))
        .route("/slow", get(slow))
        .route("/status/{code}", get(status))
        .route("/crash", post(crash))
        .route("/upload", post(upload))
        .route("/upload/progress", get(upload_progress))
        .fallback(describe)
        .with_state(Arc::new(AtomicUsize::new(0)));

    let listener = tokio::net::TcpListener::bind(address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Answers JSON-RPC requests by echoing the request body.
async fn mcp(headers: HeaderMap, body: Bytes) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .cloned()
        .unwrap_or(HeaderValue::from_static("application/json"));

    ([(header::CONTENT_TYPE, content_type)], body).into_response()
}

#[derive(Deserialize)]
struct SseParams {
    count: u32,
    interval_ms: u64,
}

/// Emits `count` events, one every `interval_ms`.
async fn sse(Query(params): Query<SseParams>) -> Response {
    let interval = Duration::from_millis(params.interval_ms);
    let count = params.count;

    let events = stream::unfold(0, move |sent| async move {
        if sent == count {
            return None;
        }

        if sent > 0 {
            tokio::time::sleep(interval).await;
        }

        let event = format!("event: message\ndata: {{\"n\":{sent}}}\n\n");

        Some((Ok::<_, std::io::Error>(Bytes::from(event)), sent + 1))
    });

    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(events),
    )
        .into_response()
}

/// Sends one event, then keeps the stream open without sending anything.
async fn silent_stream() -> Response {
    let first = stream::once(async { Ok::<_, std::io::Error>(Bytes::from_static(b"event: message\ndata: hello\n\n")) });
    let events = first.chain(stream::pending());

    (
        [(header::CONTENT_TYPE, "text/event-stream")],
        Body::from_stream(events),
    )
        .into_response()
}

#[derive(Deserialize)]
struct SlowParams {
    ms: u64,
}

async fn slow(Query(params): Query<SlowParams>) -> &'static str {
    tokio::time::sleep(Duration::from_millis(params.ms)).await;
    "done"
}

async fn status(Path(code): Path<u16>) -> Response {
    let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, format!("upstream status {code}")).into_response();

    if status == StatusCode::UNAUTHORIZED {
        response
            .headers_mut()
            .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Basic realm=\"upstream\""));
    }

    response
}

/// Consumes the request body chunk by chunk, counting the bytes as they arrive.
/// Answers with the total once the upload ends.
async fn upload(State(received): State<Arc<AtomicUsize>>, body: Body) -> String {
    let mut chunks = body.into_data_stream();
    let mut total = 0;

    while let Some(Ok(chunk)) = chunks.next().await {
        total += chunk.len();
        received.fetch_add(chunk.len(), Ordering::SeqCst);
    }

    total.to_string()
}

/// Bytes received by `/upload` so far, across all uploads.
async fn upload_progress(State(received): State<Arc<AtomicUsize>>) -> String {
    received.load(Ordering::SeqCst).to_string()
}

/// Exits the process right after answering.
async fn crash() -> &'static str {
    tokio::spawn(async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        std::process::exit(1);
    });

    "crashing"
}

/// Describes the request it received.
async fn describe(method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    let headers: BTreeMap<String, String> = headers
        .iter()
        .map(|(name, value)| (name.to_string(), value.to_str().unwrap_or_default().to_string()))
        .collect();

    let body = json!({
        "method": method.as_str(),
        "path": uri.path(),
        "query": uri.query(),
        "headers": headers,
        "body": String::from_utf8_lossy(&body),
    });

    let mut response = Json(body).into_response();

    response
        .headers_mut()
        .insert("x-upstream", HeaderValue::from_static("mock"));

    response
}
