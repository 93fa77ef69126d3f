pub(crate) mod challenge;
pub(crate) mod claims;
pub(crate) mod error;
mod jwks;
mod jwt;

use std::{
    fmt::Display,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::body::Body;
use config::OauthConfig;
use error::AuthError;
use http::{Request, Response, request::Parts};
use jwt::JwtAuth;
use tower::Layer;
use url::Url;

use claims::TokenClaims;

type AuthResult<T> = Result<T, AuthError>;

/// Authorization gate in front of the proxied routes. Requests passing it carry their
/// [`TokenClaims`] in the request extensions.
#[derive(Clone)]
pub struct AuthLayer(Arc<AuthLayerInner>);

struct AuthLayerInner {
    jwt: JwtAuth,
    scopes: ScopePolicy,
    metadata_url: Url,
}

impl AuthLayer {
    pub fn new(config: OauthConfig) -> anyhow::Result<Self> {
        let scopes = ScopePolicy::new(&config);
        let metadata_url = config.protected_resource.metadata_url();
        let jwt = JwtAuth::new(config)?;

        Ok(Self(Arc::new(AuthLayerInner {
            jwt,
            scopes,
            metadata_url,
        })))
    }
}

impl AuthLayerInner {
    async fn authorize(&self, parts: &Parts) -> AuthResult<TokenClaims> {
        let claims = self.jwt.authenticate(&parts.headers).await?;
        let required = self.scopes.required_for(parts.uri.path());

        if !claims.missing_scopes(&required).is_empty() {
            return Err(AuthError::InsufficientScope { required });
        }

        Ok(claims)
    }
}

impl<Service> Layer<Service> for AuthLayer
where
    Service: Send + Clone,
{
    type Service = AuthService<Service>;

    fn layer(&self, next: Service) -> Self::Service {
        AuthService {
            next,
            layer: self.0.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthService<Service> {
    next: Service,
    layer: Arc<AuthLayerInner>,
}

impl<Service, ReqBody> tower::Service<Request<ReqBody>> for AuthService<Service>
where
    Service: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    Service::Future: Send,
    Service::Error: Display + 'static,
    ReqBody: http_body::Body + Send + 'static,
{
    type Response = http::Response<Body>;
    type Error = Service::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let mut next = self.next.clone();
        let layer = self.layer.clone();

        let (mut parts, body) = req.into_parts();

        Box::pin(async move {
            match layer.authorize(&parts).await {
                Ok(claims) => {
                    log::debug!("Authorized request for subject {:?}", claims.subject);

                    parts.extensions.insert(claims);
                    next.call(Request::from_parts(parts, body)).await
                }
                Err(error) => {
                    match &error {
                        AuthError::KeySetFetchFailed => log::error!(kind = error.kind(); "{error}"),
                        _ => log::debug!(kind = error.kind(); "Rejected {} {}: {error}", parts.method, parts.uri.path()),
                    }

                    Ok(challenge::challenge(&error, &layer.metadata_url))
                }
            }
        })
    }
}

/// Scopes a request must carry: the global set plus the set of the longest matching
/// path prefix.
struct ScopePolicy {
    global: Vec<String>,
    by_prefix: Vec<(String, Vec<String>)>,
}

impl ScopePolicy {
    fn new(config: &OauthConfig) -> Self {
        let mut by_prefix: Vec<_> = config
            .path_scopes
            .iter()
            .map(|(prefix, scopes)| (prefix.trim_end_matches('/').to_string(), scopes.clone()))
            .collect();

        // Longest prefix first.
        by_prefix.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()));

        Self {
            global: config.required_scopes.clone(),
            by_prefix,
        }
    }

    fn required_for(&self, path: &str) -> Vec<String> {
        let mut required = self.global.clone();

        let matching = self
            .by_prefix
            .iter()
            .find(|(prefix, _)| matches_prefix(path, prefix))
            .map(|(_, scopes)| scopes);

        for scope in matching.into_iter().flatten() {
            if !required.contains(scope) {
                required.push(scope.clone());
            }
        }

        required
    }
}

/// Segment-aware prefix match: `/admin` matches `/admin` and `/admin/users`, but not
/// `/administrator`. An empty prefix (from `/`) matches everything.
fn matches_prefix(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/'),
        None => false,
    }
}
