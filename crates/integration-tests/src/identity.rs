use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{Duration, Utc};
use jwt_compact::{
    AlgorithmExt, Claims, Header,
    alg::{Hs256, Hs256Key},
};
use serde_json::{Value, json};
use tokio::{net::TcpListener, task::JoinHandle};

/// Audience the gateway under test expects in tokens.
pub const AUDIENCE: &str = "https://mcp.example.com/mcp";

#[derive(Clone)]
struct SigningKey {
    kid: String,
    secret: Vec<u8>,
}

#[derive(Clone)]
struct ProviderState {
    keys: Arc<Mutex<Vec<SigningKey>>>,
    fetches: Arc<AtomicU32>,
    failing: Arc<AtomicBool>,
}

/// An authorization server publishing a JWKS document and minting HS256 tokens.
pub struct IdentityProvider {
    address: SocketAddr,
    state: ProviderState,
    _handle: JoinHandle<()>,
}

impl IdentityProvider {
    pub async fn start() -> Self {
        let state = ProviderState {
            keys: Arc::new(Mutex::new(vec![SigningKey {
                kid: "key-1".to_string(),
                secret: b"first-signing-secret-of-the-identity-provider".to_vec(),
            }])),
            fetches: Arc::new(AtomicU32::new(0)),
            failing: Arc::new(AtomicBool::new(false)),
        };

        let app = Router::new()
            .route("/.well-known/jwks.json", get(jwks))
            .with_state(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            address,
            state,
            _handle: handle,
        }
    }

    pub fn issuer(&self) -> String {
        format!("http://{}", self.address)
    }

    pub fn jwks_url(&self) -> String {
        format!("http://{}/.well-known/jwks.json", self.address)
    }

    /// How often the key set was requested.
    pub fn fetch_count(&self) -> u32 {
        self.state.fetches.load(Ordering::SeqCst)
    }

    /// Makes the key set endpoint answer 500.
    pub fn set_failing(&self, failing: bool) {
        self.state.failing.store(failing, Ordering::SeqCst);
    }

    /// Replaces the published keys with a single new key. Tokens minted afterwards use it.
    pub fn rotate(&self, kid: &str, secret: &[u8]) {
        *self.state.keys.lock().unwrap() = vec![SigningKey {
            kid: kid.to_string(),
            secret: secret.to_vec(),
        }];
    }

    /// A token accepted by the gateway under test, with the given scopes.
    pub fn token(&self, scopes: &[&str]) -> String {
        self.mint(TokenSpec {
            scopes,
            ..TokenSpec::valid(self)
        })
    }

    pub fn mint(&self, options: TokenSpec<'_>) -> String {
        let key = self.state.keys.lock().unwrap()[0].clone();
        let secret = options.secret.map(<[u8]>::to_vec).unwrap_or(key.secret);

        let mut custom = json!({
            "iss": options.issuer,
            "aud": options.audience,
            "sub": "user-1",
        });

        if !options.scopes.is_empty() {
            custom["scope"] = Value::String(options.scopes.join(" "));
        }

        let mut claims = Claims::new(custom);
        claims.issued_at = Some(Utc::now());
        claims.expiration = Some(Utc::now() + options.expires_in);

        let header = Header::empty().with_key_id(key.kid);

        Hs256.token(&header, &claims, &Hs256Key::new(secret)).unwrap()
    }
}

/// Knobs for minting tokens, including invalid ones.
pub struct TokenSpec<'a> {
    pub issuer: String,
    pub audience: String,
    pub scopes: &'a [&'a str],
    pub expires_in: Duration,
    /// Signs with this secret instead of the published key.
    pub secret: Option<&'a [u8]>,
}

impl TokenSpec<'_> {
    pub fn valid(provider: &IdentityProvider) -> Self {
        Self {
            issuer: provider.issuer(),
            audience: AUDIENCE.to_string(),
            scopes: &[],
            expires_in: Duration::minutes(5),
            secret: None,
        }
    }
}

async fn jwks(State(state): State<ProviderState>) -> impl IntoResponse {
    state.fetches.fetch_add(1, Ordering::SeqCst);

    if state.failing.load(Ordering::SeqCst) {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    let keys: Vec<Value> = state
        .keys
        .lock()
        .unwrap()
        .iter()
        .map(|key| {
            json!({
                "kty": "oct",
                "kid": key.kid,
                "k": URL_SAFE_NO_PAD.encode(&key.secret),
            })
        })
        .collect();

    Ok(Json(json!({ "keys": keys })))
}
