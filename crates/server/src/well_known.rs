//! OAuth 2.0 Protected Resource Metadata (RFC 9728).

use axum::{Router, routing::get};
use bytes::Bytes;
use config::{PROTECTED_RESOURCE_METADATA_PATH, ProtectedResourceConfig};
use http::{HeaderValue, header};
use serde::Serialize;
use url::Url;

#[derive(Debug, Serialize)]
pub(crate) struct ProtectedResourceMetadata {
    /// The protected resource's identifier
    resource: String,

    /// Issuer identifiers of the authorization servers accepted by this resource
    authorization_servers: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    scopes_supported: Option<Vec<String>>,

    /// Only the `Authorization` header is accepted, never query or form tokens
    bearer_methods_supported: Vec<&'static str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    resource_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    resource_documentation: Option<String>,
}

impl ProtectedResourceMetadata {
    pub fn new(config: &ProtectedResourceConfig) -> Self {
        Self {
            resource: identifier(&config.resource),
            authorization_servers: config.authorization_servers.iter().map(identifier).collect(),
            scopes_supported: config.scopes_supported.clone(),
            bearer_methods_supported: vec!["header"],
            resource_name: config.resource_name.clone(),
            resource_documentation: config.resource_documentation.as_ref().map(Url::to_string),
        }
    }
}

/// Serves the metadata document. It is serialized once, so every response carries the
/// same bytes.
pub(crate) fn router(config: &ProtectedResourceConfig) -> anyhow::Result<Router> {
    let document = Bytes::from(serde_json::to_vec(&ProtectedResourceMetadata::new(config))?);
    let handler = get(move || metadata(document.clone()));

    let mut router = Router::new().route(PROTECTED_RESOURCE_METADATA_PATH, handler.clone());
    let path = config.metadata_path();

    if path != PROTECTED_RESOURCE_METADATA_PATH {
        router = router.route(&path, handler);
    }

    log::debug!("Protected resource metadata available at {path}");

    Ok(router)
}

async fn metadata(document: Bytes) -> ([(header::HeaderName, HeaderValue); 2], Bytes) {
    let headers = [
        (header::CONTENT_TYPE, HeaderValue::from_static("application/json")),
        (header::CACHE_CONTROL, HeaderValue::from_static("public, max-age=3600")),
    ];

    (headers, document)
}

/// Issuer-style rendering of a URL: a bare origin loses the trailing slash `Url` adds.
fn identifier(url: &Url) -> String {
    let rendered = url.to_string();

    if url.path() == "/" && url.query().is_none() && url.fragment().is_none() {
        rendered.trim_end_matches('/').to_string()
    } else {
        rendered
    }
}
