use std::{str::FromStr, sync::Arc};

use config::OauthConfig;
use http::{HeaderMap, header::AUTHORIZATION};
use jwt_compact::{Algorithm, AlgorithmExt, TimeOptions, Token, UntrustedToken, jwk::JsonWebKey};

use super::{
    AuthResult,
    claims::{CustomClaims, TokenClaims},
    error::AuthError,
    jwks::{Alg, CachedKeys, Jwks, KeySetCache},
};

pub(crate) struct JwtAuth {
    config: OauthConfig,
    keys: KeySetCache,
    leeway: chrono::Duration,
}

impl JwtAuth {
    pub fn new(config: OauthConfig) -> anyhow::Result<Self> {
        let keys = KeySetCache::new(&config)?;

        let leeway = chrono::Duration::from_std(config.clock_skew)
            .map_err(|e| anyhow::anyhow!("server.oauth.clock_skew is out of range: {e}"))?;

        Ok(JwtAuth { config, keys, leeway })
    }

    /// Validates the bearer token of a request.
    pub async fn authenticate(&self, headers: &HeaderMap) -> AuthResult<TokenClaims> {
        let token = bearer_token(headers)?;
        self.validate(token).await
    }

    /// Validates a raw JWT. Expiry is checked before the signature, so an expired token
    /// is always reported as expired and never costs a key set fetch.
    pub async fn validate(&self, token: &str) -> AuthResult<TokenClaims> {
        let untrusted = UntrustedToken::new(token).map_err(|_| AuthError::TokenMalformed("token is not a valid JWT"))?;
        let alg = Alg::from_str(untrusted.algorithm())?;

        let unverified = untrusted
            .deserialize_claims_unchecked::<CustomClaims>()
            .map_err(|_| AuthError::TokenMalformed("token claims cannot be decoded"))?;

        if unverified.expiration.is_none() {
            return Err(AuthError::TokenMalformed("token has no expiration"));
        }

        let time_options = TimeOptions::from_leeway(self.leeway);

        unverified
            .validate_expiration(&time_options)
            .map_err(|_| AuthError::TokenExpired)?;

        let token = self.verify_signature(alg, &untrusted).await?;
        let claims = token.claims();

        if claims.not_before.is_some() && claims.validate_maturity(&time_options).is_err() {
            return Err(AuthError::TokenMalformed("token is not yet valid"));
        }

        self.validate_issuer(&claims.custom)?;
        self.validate_audience(&claims.custom)?;

        Ok(TokenClaims::from(claims))
    }

    async fn verify_signature(&self, alg: Alg, untrusted: &UntrustedToken<'_>) -> AuthResult<Token<CustomClaims>> {
        let keys: Arc<CachedKeys> = self.keys.get().await?;

        if let Some(token) = verify(alg, &keys.keys, untrusted) {
            return Ok(token);
        }

        // Unknown key id or a signature from a rotated key: try once with a fresh set.
        let refreshed = self
            .keys
            .force_refresh(&keys)
            .await
            .ok_or(AuthError::TokenInvalidSignature)?;

        verify(alg, &refreshed.keys, untrusted).ok_or(AuthError::TokenInvalidSignature)
    }

    fn validate_issuer(&self, claims: &CustomClaims) -> AuthResult<()> {
        let Some(expected_issuer) = &self.config.expected_issuer else {
            return Ok(());
        };

        match claims.issuer() {
            Some(issuer) if issuer == expected_issuer => Ok(()),
            Some(issuer) => {
                log::debug!("Token rejected: issuer '{issuer}' is not '{expected_issuer}'");
                Err(AuthError::TokenIssuerMismatch)
            }
            None => {
                log::debug!("Token rejected: missing issuer claim");
                Err(AuthError::TokenIssuerMismatch)
            }
        }
    }

    fn validate_audience(&self, claims: &CustomClaims) -> AuthResult<()> {
        let Some(expected_audience) = &self.config.expected_audience else {
            return Ok(());
        };

        if claims.has_audience(expected_audience) {
            Ok(())
        } else {
            log::debug!("Token rejected: audience does not contain '{expected_audience}'");
            Err(AuthError::TokenAudienceMismatch)
        }
    }
}

/// Extracts the token from an `Authorization: Bearer <token>` header. The scheme is
/// matched case-insensitively (RFC 7235).
pub(super) fn bearer_token(headers: &HeaderMap) -> AuthResult<&str> {
    let header = headers.get(AUTHORIZATION).ok_or(AuthError::TokenMissing)?;

    let value = header
        .to_str()
        .map_err(|_| AuthError::TokenMalformed("authorization header is not valid ASCII"))?;

    let Some((scheme, token)) = value.split_once(' ') else {
        return Err(if value.eq_ignore_ascii_case("bearer") {
            AuthError::TokenMalformed("missing token")
        } else {
            AuthError::TokenMalformed("token must be prefixed with Bearer")
        });
    };

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::TokenMalformed("token must be prefixed with Bearer"));
    }

    match token.trim() {
        "" => Err(AuthError::TokenMalformed("missing token")),
        token => Ok(token),
    }
}

/// Tries every key of the set that may have signed the token.
fn verify(alg: Alg, jwks: &Jwks<'_>, untrusted: &UntrustedToken<'_>) -> Option<Token<CustomClaims>> {
    use jwt_compact::alg::*;

    let token_kid = untrusted.header().key_id.as_deref();

    jwks.keys
        .iter()
        .filter(|jwk| match (token_kid, jwk.key_id.as_deref()) {
            (Some(expected), Some(kid)) => expected == kid,
            (Some(_), None) => false,
            (None, _) => true,
        })
        .find_map(|jwk| match alg {
            Alg::HS256 => decode(Hs256, &jwk.key, untrusted),
            Alg::HS384 => decode(Hs384, &jwk.key, untrusted),
            Alg::HS512 => decode(Hs512, &jwk.key, untrusted),
            Alg::ES256 => decode(Es256, &jwk.key, untrusted),
            Alg::RS256 => decode(Rsa::rs256(), &jwk.key, untrusted),
            Alg::RS384 => decode(Rsa::rs384(), &jwk.key, untrusted),
            Alg::RS512 => decode(Rsa::rs512(), &jwk.key, untrusted),
            Alg::PS256 => decode(Rsa::ps256(), &jwk.key, untrusted),
            Alg::PS384 => decode(Rsa::ps384(), &jwk.key, untrusted),
            Alg::PS512 => decode(Rsa::ps512(), &jwk.key, untrusted),
            Alg::EdDSA => decode(Ed25519, &jwk.key, untrusted),
        })
}

fn decode<A: Algorithm>(alg: A, jwk: &JsonWebKey<'_>, untrusted: &UntrustedToken<'_>) -> Option<Token<CustomClaims>>
where
    A::VerifyingKey: std::fmt::Debug + for<'a> TryFrom<&'a JsonWebKey<'a>>,
{
    let key = A::VerifyingKey::try_from(jwk).ok()?;
    alg.validator(&key).validate(untrusted).ok()
}
