use std::{
    borrow::Cow,
    str::FromStr,
    sync::Arc,
    time::{Duration, Instant},
};

use config::OauthConfig;
use jwt_compact::jwk::JsonWebKey;
use tokio::sync::{Mutex, RwLock};
use url::Url;

use super::error::AuthError;

/// Key set of the authorization server, fetched lazily and shared between requests.
///
/// Readers clone the current `Arc`; a refresh swaps in a whole new entry. Fetches are
/// serialized through `refresh`, so concurrent requests never stampede the provider.
pub(super) struct KeySetCache {
    url: Url,
    client: reqwest::Client,
    poll_interval: Option<Duration>,
    min_refresh_interval: Duration,
    stale_grace: Duration,
    current: RwLock<Option<Arc<CachedKeys>>>,
    refresh: Mutex<RefreshState>,
}

pub(super) struct CachedKeys {
    pub keys: Jwks<'static>,
    fetched_at: Instant,
}

#[derive(Default)]
struct RefreshState {
    last_forced: Option<Instant>,
    last_failure: Option<Instant>,
}

impl KeySetCache {
    pub fn new(config: &OauthConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create the key set client: {e}"))?;

        Ok(Self {
            url: config.url.clone(),
            client,
            poll_interval: config.poll_interval,
            min_refresh_interval: config.min_refresh_interval,
            stale_grace: config.stale_grace,
            current: RwLock::new(None),
            refresh: Mutex::new(RefreshState::default()),
        })
    }

    /// The current key set. Fetches it when missing or older than the poll interval.
    pub async fn get(&self) -> Result<Arc<CachedKeys>, AuthError> {
        if let Some(keys) = self.fresh().await {
            return Ok(keys);
        }

        let mut state = self.refresh.lock().await;

        // Double-check: another task might have refreshed while we were waiting
        if let Some(keys) = self.fresh().await {
            return Ok(keys);
        }

        let cached = self.current.read().await.clone();
        let stale = cached.filter(|keys| self.usable_when_stale(keys));

        // The provider failed a moment ago, don't hammer it on every request.
        if let Some(keys) = &stale
            && state
                .last_failure
                .is_some_and(|at| at.elapsed() < self.min_refresh_interval)
        {
            return Ok(keys.clone());
        }

        match self.fetch().await {
            Ok(keys) => {
                state.last_failure = None;
                Ok(self.store(keys).await)
            }
            Err(err) => {
                state.last_failure = Some(Instant::now());

                match stale {
                    Some(keys) => {
                        log::warn!("Failed to refresh the key set from {}, using cached keys: {err}", self.url);
                        Ok(keys)
                    }
                    None => {
                        log::error!("Failed to fetch the key set from {}: {err}", self.url);
                        Err(AuthError::KeySetFetchFailed)
                    }
                }
            }
        }
    }

    /// Refetches the key set after no key verified a token, e.g. because the provider
    /// rotated its keys. Allowed once per minimum refresh interval. Returns `None` when
    /// no newer key set is available.
    pub async fn force_refresh(&self, seen: &Arc<CachedKeys>) -> Option<Arc<CachedKeys>> {
        let mut state = self.refresh.lock().await;

        if let Some(current) = self.current.read().await.clone()
            && !Arc::ptr_eq(&current, seen)
        {
            return Some(current);
        }

        if state
            .last_forced
            .is_some_and(|at| at.elapsed() < self.min_refresh_interval)
        {
            log::debug!("Skipping forced key set refresh, the last one was too recent");
            return None;
        }

        state.last_forced = Some(Instant::now());
        log::debug!("Refreshing the key set from {} after a verification failure", self.url);

        match self.fetch().await {
            Ok(keys) => Some(self.store(keys).await),
            Err(err) => {
                state.last_failure = Some(Instant::now());
                log::warn!("Failed to refresh the key set from {}: {err}", self.url);
                None
            }
        }
    }

    async fn fresh(&self) -> Option<Arc<CachedKeys>> {
        let keys = self.current.read().await.clone()?;

        match self.poll_interval {
            Some(ttl) if keys.fetched_at.elapsed() > ttl => None,
            _ => Some(keys),
        }
    }

    fn usable_when_stale(&self, keys: &CachedKeys) -> bool {
        match self.poll_interval {
            Some(ttl) => keys.fetched_at.elapsed() <= ttl.saturating_add(self.stale_grace),
            None => true,
        }
    }

    async fn fetch(&self) -> anyhow::Result<Jwks<'static>> {
        let keys = self
            .client
            .get(self.url.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(keys)
    }

    async fn store(&self, keys: Jwks<'static>) -> Arc<CachedKeys> {
        let keys = Arc::new(CachedKeys {
            keys,
            fetched_at: Instant::now(),
        });

        *self.current.write().await = Some(keys.clone());

        log::debug!("Cached {} signing keys from {}", keys.keys.keys.len(), self.url);

        keys
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Jwks<'a> {
    pub keys: Vec<Jwk<'a>>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Jwk<'a> {
    #[serde(flatten)]
    pub key: JsonWebKey<'a>,
    #[serde(rename = "kid")]
    pub key_id: Option<Cow<'a, str>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Alg {
    HS256,
    HS384,
    HS512,
    ES256,
    RS256,
    RS384,
    RS512,
    PS256,
    PS384,
    PS512,
    EdDSA,
}

impl FromStr for Alg {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HS256" => Ok(Alg::HS256),
            "HS384" => Ok(Alg::HS384),
            "HS512" => Ok(Alg::HS512),
            "ES256" => Ok(Alg::ES256),
            "RS256" => Ok(Alg::RS256),
            "RS384" => Ok(Alg::RS384),
            "RS512" => Ok(Alg::RS512),
            "PS256" => Ok(Alg::PS256),
            "PS384" => Ok(Alg::PS384),
            "PS512" => Ok(Alg::PS512),
            "EdDSA" => Ok(Alg::EdDSA),
            _ => Err(AuthError::TokenMalformed("unsupported signing algorithm")),
        }
    }
}
