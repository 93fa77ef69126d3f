use chrono::{DateTime, Utc};
use jwt_compact::Claims;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Token claims beyond the registered time claims handled by `jwt_compact::Claims`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomClaims {
    /// Issuer claim - identifies the principal that issued the JWT
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,

    /// Audience claim - a single string or an array of strings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<Value>,

    /// Subject claim - identifies the principal that is the subject of the JWT
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,

    /// Space-delimited scopes (RFC 8693)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,

    /// Scopes as issued by Azure AD and Okta, a string or an array
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scp: Option<Value>,

    /// Scopes as an array, used by some providers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scopes: Option<Value>,
}

impl CustomClaims {
    pub fn issuer(&self) -> Option<&str> {
        self.iss.as_deref()
    }

    /// The audience claim as a list of strings.
    pub fn audiences(&self) -> Vec<String> {
        strings(self.aud.as_ref())
    }

    pub fn has_audience(&self, expected_audience: &str) -> bool {
        self.audiences().iter().any(|aud| aud == expected_audience)
    }

    /// Union of the scopes found in `scope`, `scp` and `scopes`, in order of appearance.
    pub fn granted_scopes(&self) -> Vec<String> {
        let mut scopes: Vec<String> = Vec::new();

        let from_scope = self
            .scope
            .as_deref()
            .into_iter()
            .flat_map(str::split_whitespace)
            .map(str::to_string);

        let all = from_scope
            .chain(strings(self.scp.as_ref()))
            .chain(strings(self.scopes.as_ref()));

        for scope in all {
            if !scopes.contains(&scope) {
                scopes.push(scope);
            }
        }

        scopes
    }
}

fn strings(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => s.split_whitespace().map(str::to_string).collect(),
        Some(Value::Array(values)) => values.iter().filter_map(|v| v.as_str().map(String::from)).collect(),
        _ => Vec::new(),
    }
}

/// Identity of a caller whose bearer token passed validation. Available to handlers
/// behind the authorization layer through request extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    /// The `sub` claim.
    pub subject: Option<String>,
    /// The `iss` claim.
    pub issuer: Option<String>,
    /// The `aud` claim, normalized to a list.
    pub audience: Vec<String>,
    /// Granted scopes.
    pub scopes: Vec<String>,
    /// The `exp` claim.
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenClaims {
    /// The required scopes that were not granted.
    pub fn missing_scopes(&self, required: &[String]) -> Vec<String> {
        required
            .iter()
            .filter(|scope| !self.scopes.contains(scope))
            .cloned()
            .collect()
    }
}

impl From<&Claims<CustomClaims>> for TokenClaims {
    fn from(claims: &Claims<CustomClaims>) -> Self {
        Self {
            subject: claims.custom.sub.clone(),
            issuer: claims.custom.iss.clone(),
            audience: claims.custom.audiences(),
            scopes: claims.custom.granted_scopes(),
            expires_at: claims.expiration,
        }
    }
}
