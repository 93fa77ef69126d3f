//! RFC 6750 challenges for requests that fail the authorization gate.

use axum::body::Body;
use http::{HeaderValue, Response, header::WWW_AUTHENTICATE};
use url::Url;

use super::error::AuthError;
use crate::error::ErrorResponse;

/// Builds the response for a failed authorization. Every 401 and 403 carries a
/// `WWW-Authenticate` header pointing to the protected resource metadata, so clients
/// can discover the authorization server.
pub(crate) fn challenge(error: &AuthError, metadata_url: &Url) -> Response<Body> {
    let description = error.to_string();

    let header = match error {
        // RFC 6750 §3.1: no error code when the request lacked authentication entirely.
        AuthError::TokenMissing => Some(format!(r#"Bearer resource_metadata="{metadata_url}""#)),
        AuthError::InsufficientScope { required } => Some(format!(
            r#"Bearer error="insufficient_scope", scope="{}", resource_metadata="{metadata_url}""#,
            quoted(&required.join(" "))
        )),
        AuthError::KeySetFetchFailed => None,
        _ => Some(format!(
            r#"Bearer error="invalid_token", error_description="{}", resource_metadata="{metadata_url}""#,
            quoted(&description)
        )),
    };

    let mut response = ErrorResponse::new(error.error_code(), description)
        .with_resource_metadata(metadata_url.as_str())
        .into_response(error.status());

    if let Some(header) = header {
        response.headers_mut().insert(WWW_AUTHENTICATE, header_value(&header));
    }

    response
}

/// HeaderValue validation keeps anything odd in the URL out of the header. The bare
/// scheme is sent instead, which loses the metadata pointer.
fn header_value(challenge: &str) -> HeaderValue {
    HeaderValue::from_str(challenge).unwrap_or_else(|err| {
        log::warn!("Challenge is not a valid header value, sending it without parameters: {err}");
        HeaderValue::from_static("Bearer")
    })
}

/// Strips characters that cannot appear inside a quoted-string parameter.
fn quoted(value: &str) -> String {
    value
        .chars()
        .filter(|c| *c != '"' && *c != '\\' && !c.is_control())
        .collect()
}
