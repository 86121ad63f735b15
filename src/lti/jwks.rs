//! Platform JWKS fetching and caching.
//!
//! Key sets are fetched through the [`RemoteCaller`] and cached per
//! endpoint. An unknown `kid` forces one refetch so key rotation on the
//! platform side is picked up. A failed fetch is always reported; there is
//! no stale fallback.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use http::{HeaderMap, Method, header};
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::http_client::{RemoteCaller, RemoteError};

/// Default cache TTL in seconds (5 minutes).
pub const DEFAULT_JWKS_CACHE_SECONDS: u64 = 300;

/// A single JSON Web Key from a JWKS document.
#[derive(Debug, Clone, Deserialize)]
pub struct Jwk {
    /// Key type (e.g., "RSA")
    pub kty: String,
    /// Key ID, matched against the JWT header `kid`
    pub kid: Option<String>,
    /// Algorithm (e.g., "RS256")
    pub alg: Option<String>,
    /// Key use (e.g., "sig" for signature)
    #[serde(rename = "use")]
    pub key_use: Option<String>,
    /// RSA modulus (base64url encoded)
    pub n: Option<String>,
    /// RSA exponent (base64url encoded)
    pub e: Option<String>,
}

/// A JWKS document containing multiple keys.
#[derive(Debug, Clone, Deserialize)]
pub struct JwksDocument {
    pub keys: Vec<Jwk>,
}

/// Decoding keys from one fetch of one endpoint.
#[derive(Clone)]
struct CachedKeySet {
    keys: HashMap<String, DecodingKey>,
    fetched_at: Instant,
}

/// Thread-safe cache of platform key sets, keyed by JWKS endpoint.
pub struct KeySetCache {
    caller: Arc<RemoteCaller>,
    cache_ttl: Duration,
    sets: RwLock<HashMap<String, CachedKeySet>>,
}

impl KeySetCache {
    /// Create a cache. A zero TTL fetches on every lookup.
    pub fn new(caller: Arc<RemoteCaller>, cache_ttl: Duration) -> Self {
        Self {
            caller,
            cache_ttl,
            sets: RwLock::new(HashMap::new()),
        }
    }

    /// Get the decoding key for `kid` from the key set at `jwks_url`.
    pub async fn get_key(
        &self,
        jwks_url: &str,
        kid: &str,
        cancel: &CancellationToken,
    ) -> Result<DecodingKey, JwksError> {
        if let Some(key) = self.get_fresh(jwks_url, kid).await {
            return Ok(key);
        }

        let set = self.fetch_keys(jwks_url, cancel).await?;
        let key = set.keys.get(kid).cloned();

        if !self.cache_ttl.is_zero() {
            self.sets.write().await.insert(jwks_url.to_string(), set);
        }

        key.ok_or_else(|| JwksError::KeyNotFound(kid.to_string()))
    }

    async fn get_fresh(&self, jwks_url: &str, kid: &str) -> Option<DecodingKey> {
        let sets = self.sets.read().await;
        let set = sets.get(jwks_url)?;
        if set.fetched_at.elapsed() > self.cache_ttl {
            return None;
        }
        set.keys.get(kid).cloned()
    }

    async fn fetch_keys(
        &self,
        jwks_url: &str,
        cancel: &CancellationToken,
    ) -> Result<CachedKeySet, JwksError> {
        debug!("Fetching JWKS from {}", jwks_url);

        let mut headers = HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let document: JwksDocument = self
            .caller
            .call_json(Method::GET, jwks_url, headers, None, cancel)
            .await
            .map_err(JwksError::Fetch)?;

        let mut keys = HashMap::new();
        for jwk in document.keys {
            if jwk.kty != "RSA" {
                debug!("Skipping non-RSA key: {:?}", jwk.kty);
                continue;
            }

            if jwk.key_use.as_deref().is_some_and(|u| u != "sig") {
                debug!("Skipping non-signature key");
                continue;
            }

            if jwk.alg.as_deref().is_some_and(|alg| alg != "RS256") {
                debug!("Skipping key with algorithm {:?}", jwk.alg);
                continue;
            }

            let Some(kid) = jwk.kid.clone() else {
                warn!("Skipping JWK without kid");
                continue;
            };

            match jwk_to_decoding_key(&jwk) {
                Ok(decoding_key) => {
                    debug!("Cached key with kid: {}", kid);
                    keys.insert(kid, decoding_key);
                }
                Err(e) => {
                    warn!("Failed to parse JWK: {}", e);
                }
            }
        }

        if keys.is_empty() {
            return Err(JwksError::NoValidKeys);
        }

        Ok(CachedKeySet {
            keys,
            fetched_at: Instant::now(),
        })
    }

    /// Number of endpoints with a cached key set.
    pub async fn cached_sets(&self) -> usize {
        self.sets.read().await.len()
    }
}

/// Convert an RSA JWK to a jsonwebtoken DecodingKey.
fn jwk_to_decoding_key(jwk: &Jwk) -> Result<DecodingKey, JwksError> {
    let n = jwk
        .n
        .as_ref()
        .ok_or_else(|| JwksError::Parse("Missing 'n' in RSA key".to_string()))?;
    let e = jwk
        .e
        .as_ref()
        .ok_or_else(|| JwksError::Parse("Missing 'e' in RSA key".to_string()))?;

    DecodingKey::from_rsa_components(n, e)
        .map_err(|e| JwksError::Parse(format!("Invalid RSA components: {}", e)))
}

/// Errors that can occur when resolving a platform key.
#[derive(Debug, Clone)]
pub enum JwksError {
    /// Failed to fetch or decode the JWKS document.
    Fetch(RemoteError),
    /// A key in the document could not be used.
    Parse(String),
    /// The document contained no usable RSA signing key.
    NoValidKeys,
    /// No key with the requested kid.
    KeyNotFound(String),
}

impl fmt::Display for JwksError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch(err) => write!(f, "Failed to fetch JWKS: {}", err),
            Self::Parse(msg) => write!(f, "Failed to parse JWK: {}", msg),
            Self::NoValidKeys => write!(f, "No valid keys found in JWKS"),
            Self::KeyNotFound(kid) => write!(f, "Key not found: {}", kid),
        }
    }
}

impl std::error::Error for JwksError {}
