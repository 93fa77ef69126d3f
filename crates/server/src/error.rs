use axum::body::Body;
use http::{HeaderValue, Response, StatusCode, header::CONTENT_TYPE};
use serde::Serialize;

/// JSON body of every error the gateway produces itself.
#[derive(Debug, Serialize)]
pub(crate) struct ErrorResponse<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_metadata: Option<String>,
}

impl<'a> ErrorResponse<'a> {
    pub fn new(error: &'a str, description: impl Into<String>) -> Self {
        Self {
            error,
            error_description: Some(description.into()),
            resource_metadata: None,
        }
    }

    pub fn with_resource_metadata(mut self, url: impl Into<String>) -> Self {
        self.resource_metadata = Some(url.into());
        self
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"error":"internal_error"}"#.to_string())
    }

    pub fn into_response(self, status: StatusCode) -> Response<Body> {
        let mut response = Response::new(Body::from(self.to_json()));

        *response.status_mut() = status;

        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        response
    }
}
