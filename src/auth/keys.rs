use async_trait::async_trait;
use jsonwebtoken::{
    Algorithm, DecodingKey,
    jwk::{AlgorithmParameters, EllipticCurve, Jwk, JwkSet},
};
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::{Mutex, RwLock};

use super::AuthError;

/// Default lifetime of a fetched key set (1 hour).
pub const DEFAULT_KEY_TTL: Duration = Duration::from_secs(3600);

/// PublicKey
///
/// A verification key together with the only algorithms a token signed by it
/// may use. The list is derived from the key type, never from a token header.
pub struct PublicKey {
    pub decoding_key: DecodingKey,
    pub algorithms: Vec<Algorithm>,
}

impl PublicKey {
    /// from_jwk
    ///
    /// Pins RSA keys to RS256, P-256 to ES256, P-384 to ES384 and Ed25519 to
    /// EdDSA. Symmetric and unknown key types yield `None`.
    pub fn from_jwk(jwk: &Jwk) -> Option<Self> {
        let algorithms = match &jwk.algorithm {
            AlgorithmParameters::RSA(_) => vec![Algorithm::RS256],
            AlgorithmParameters::EllipticCurve(params) => match params.curve {
                EllipticCurve::P256 => vec![Algorithm::ES256],
                EllipticCurve::P384 => vec![Algorithm::ES384],
                _ => return None,
            },
            AlgorithmParameters::OctetKeyPair(params)
                if matches!(params.curve, EllipticCurve::Ed25519) =>
            {
                vec![Algorithm::EdDSA]
            }
            _ => return None,
        };
        let decoding_key = DecodingKey::from_jwk(jwk).ok()?;
        Some(Self {
            decoding_key,
            algorithms,
        })
    }
}

/// Key id to verification key.
pub type KeyMap = HashMap<String, Arc<PublicKey>>;

/// KeySource
///
/// Where the signing keys come from. The production source is the JWKS
/// endpoint; tests plug in their own.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch(&self) -> Result<JwkSet, AuthError>;
}

/// HttpKeySource
///
/// Fetches a JWK set over HTTP. The request is bounded by the client timeout;
/// failures are returned as-is, never retried.
pub struct HttpKeySource {
    client: reqwest::Client,
    url: String,
}

impl HttpKeySource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, AuthError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn fetch(&self) -> Result<JwkSet, AuthError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| AuthError::KeyFetch(e.to_string()))?;

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| AuthError::KeyFetch(format!("malformed key set: {e}")))
    }
}

struct Snapshot {
    keys: Arc<KeyMap>,
    fetched_at: Instant,
}

/// PublicKeyCache
///
/// Lazily fetches and time-caches the signing keys. Built once at startup and
/// shared through the `Authorizer`.
///
/// - The set is refetched when empty or older than `ttl`.
/// - An expired set is never served, even if the refresh fails.
/// - Refreshes are single-flight: concurrent callers wait on the one in
///   progress and then reuse its result.
pub struct PublicKeyCache {
    source: Arc<dyn KeySource>,
    ttl: Duration,
    snapshot: RwLock<Option<Snapshot>>,
    refresh: Mutex<()>,
}

impl PublicKeyCache {
    pub fn new(source: Arc<dyn KeySource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            snapshot: RwLock::new(None),
            refresh: Mutex::new(()),
        }
    }

    /// get_keys
    ///
    /// Returns the current key set, fetching it first when needed.
    pub async fn get_keys(&self) -> Result<Arc<KeyMap>, AuthError> {
        if let Some(keys) = self.fresh_keys().await {
            return Ok(keys);
        }

        let _refresh = self.refresh.lock().await;
        // Another caller may have refreshed while we waited.
        if let Some(keys) = self.fresh_keys().await {
            return Ok(keys);
        }

        let set = self.source.fetch().await?;
        let keys = Arc::new(convert_key_set(&set));
        tracing::info!(keys = keys.len(), "refreshed token signing keys");

        *self.snapshot.write().await = Some(Snapshot {
            keys: keys.clone(),
            fetched_at: Instant::now(),
        });
        Ok(keys)
    }

    /// Looks up a single key by id.
    pub async fn get_key(&self, kid: &str) -> Result<Option<Arc<PublicKey>>, AuthError> {
        Ok(self.get_keys().await?.get(kid).cloned())
    }

    async fn fresh_keys(&self) -> Option<Arc<KeyMap>> {
        let snapshot = self.snapshot.read().await;
        snapshot
            .as_ref()
            .filter(|s| !s.keys.is_empty() && s.fetched_at.elapsed() < self.ttl)
            .map(|s| s.keys.clone())
    }
}

fn convert_key_set(set: &JwkSet) -> KeyMap {
    let mut keys = KeyMap::new();
    for jwk in &set.keys {
        let Some(kid) = jwk.common.key_id.clone() else {
            tracing::warn!("skipping signing key without kid");
            continue;
        };
        match PublicKey::from_jwk(jwk) {
            Some(key) => {
                keys.insert(kid, Arc::new(key));
            }
            None => tracing::warn!(kid = %kid, "skipping unsupported signing key"),
        }
    }
    keys
}
