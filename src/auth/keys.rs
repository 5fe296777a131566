//! Key resolution — issuer signing keys, fetched lazily and cached by key id.
//!
//! The resolver owns the only shared mutable state in the verification
//! path. Reads are concurrent (`DashMap`); a refresh triggered by a cache
//! miss runs under an async mutex so N concurrent misses for the same key
//! id produce one outbound fetch, not N. There is no background refresh;
//! staleness is detected lazily by verification traffic.
//!
//! A fetch failure is *not* a verdict on the token: callers must treat it
//! as "token unverifiable", never "token invalid".

use std::time::{Duration, Instant};

use dashmap::DashMap;
use jsonwebtoken::{
    DecodingKey,
    jwk::{AlgorithmParameters, Jwk, JwkSet},
};
use tokio::sync::Mutex;
use tracing::debug;

/// Error variants for key resolution failures.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// The key id is not present in the issuer's published key set,
    /// even after a refresh.
    #[error("Unknown key ID: {0}")]
    NotFound(String),

    /// Network or HTTP error while fetching the key set. The token that
    /// triggered the fetch is unverifiable, not invalid.
    #[error("Key set fetch error: {0}")]
    Fetch(#[from] reqwest::Error),
}

/// A cached signing key with its fetch timestamp.
struct CachedKey {
    key: DecodingKey,
    fetched_at: Instant,
}

impl CachedKey {
    fn is_stale(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() >= ttl
    }
}

/// Signing-key cache keyed by key id, refreshed from the issuer's JWKS
/// endpoint on miss or expiry.
pub struct KeyResolver {
    jwks_uri: String,
    ttl: Duration,
    http: reqwest::Client,
    keys: DashMap<String, CachedKey>,
    /// Serializes refreshes: concurrent misses coalesce on this lock and
    /// re-check the cache before fetching again.
    refresh: Mutex<()>,
}

impl KeyResolver {
    /// Create a resolver for the given JWKS endpoint.
    #[must_use]
    pub fn new(jwks_uri: String, ttl: Duration) -> Self {
        Self {
            jwks_uri,
            ttl,
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            keys: DashMap::new(),
            refresh: Mutex::new(()),
        }
    }

    /// Resolve a signing key by key id.
    ///
    /// On a cache miss (or a stale entry) the full key set is re-fetched
    /// and the cache repopulated.
    ///
    /// # Errors
    ///
    /// [`KeyError::NotFound`] if the key id is absent from the refreshed
    /// key set; [`KeyError::Fetch`] if the key set cannot be fetched.
    pub async fn resolve(&self, kid: &str) -> Result<DecodingKey, KeyError> {
        if let Some(cached) = self.keys.get(kid) {
            if !cached.is_stale(self.ttl) {
                return Ok(cached.key.clone());
            }
        }

        let _flight = self.refresh.lock().await;

        // A concurrent miss may have repopulated while we waited.
        if let Some(cached) = self.keys.get(kid) {
            if !cached.is_stale(self.ttl) {
                return Ok(cached.key.clone());
            }
        }

        debug!(kid = %kid, "Key cache miss, fetching {}", self.jwks_uri);
        let jwks: JwkSet = self
            .http
            .get(&self.jwks_uri)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        self.ingest(&jwks);

        self.keys
            .get(kid)
            .map(|cached| cached.key.clone())
            .ok_or_else(|| KeyError::NotFound(kid.to_string()))
    }

    /// Repopulate the cache from a fetched key set. Keys without a key id
    /// or with unsupported (symmetric) material are skipped.
    fn ingest(&self, jwks: &JwkSet) {
        let now = Instant::now();
        self.keys.clear();
        for jwk in &jwks.keys {
            let Some(kid) = jwk.common.key_id.as_deref() else {
                continue;
            };
            if let Some(key) = decoding_key_for(jwk) {
                self.keys.insert(
                    kid.to_string(),
                    CachedKey {
                        key,
                        fetched_at: now,
                    },
                );
            }
        }
    }
}

/// Convert a JWK to a `DecodingKey`. Symmetric key material is never
/// accepted from a published key set.
fn decoding_key_for(jwk: &Jwk) -> Option<DecodingKey> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
        AlgorithmParameters::EllipticCurve(ec) => {
            DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
        }
        AlgorithmParameters::OctetKey(_) | AlgorithmParameters::OctetKeyPair(_) => None,
    }
}
