use http::StatusCode;

/// Reasons a request fails the authorization gate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("missing bearer token")]
    TokenMissing,
    #[error("{0}")]
    TokenMalformed(&'static str),
    #[error("token has expired")]
    TokenExpired,
    #[error("token signature could not be verified")]
    TokenInvalidSignature,
    #[error("token issuer is not accepted")]
    TokenIssuerMismatch,
    #[error("token audience does not include this resource")]
    TokenAudienceMismatch,
    #[error("token was rejected by the resource server")]
    TokenRejected,
    #[error("token lacks the required scope")]
    InsufficientScope { required: Vec<String> },
    #[error("signing keys of the authorization server are unavailable")]
    KeySetFetchFailed,
}

impl AuthError {
    /// Stable name of the failure, used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::TokenMissing => "TokenMissing",
            AuthError::TokenMalformed(_) => "TokenMalformed",
            AuthError::TokenExpired => "TokenExpired",
            AuthError::TokenInvalidSignature => "TokenInvalidSignature",
            AuthError::TokenIssuerMismatch => "TokenIssuerMismatch",
            AuthError::TokenAudienceMismatch => "TokenAudienceMismatch",
            AuthError::TokenRejected => "TokenRejected",
            AuthError::InsufficientScope { .. } => "InsufficientScope",
            AuthError::KeySetFetchFailed => "KeySetFetchFailed",
        }
    }

    /// OAuth error code for the response body.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::TokenMissing => "unauthorized",
            AuthError::InsufficientScope { .. } => "insufficient_scope",
            AuthError::KeySetFetchFailed => "temporarily_unavailable",
            _ => "invalid_token",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::InsufficientScope { .. } => StatusCode::FORBIDDEN,
            AuthError::KeySetFetchFailed => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}
