//! JWKS fetching and key caching
//!
//! Keys are fetched from the identity provider's JWKS endpoint, converted to
//! decoding keys indexed by `kid`, and cached behind a reader-writer lock.
//! Refresh happens off the hot path: readers keep using the cached keys while
//! a refresh is in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::{Algorithm, DecodingKey};
use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::HttpError;

/// How long fetched keys are considered fresh
const REFRESH_INTERVAL: Duration = Duration::from_secs(3600);

/// JWKS document
#[derive(Debug, Deserialize)]
struct JwksDocument {
    keys: Vec<JwkKey>,
}

/// Individual JWK key
#[derive(Debug, Deserialize)]
struct JwkKey {
    /// Key type (RSA, EC)
    kty: String,
    /// Key ID
    kid: Option<String>,
    /// Algorithm hint
    alg: Option<String>,
    /// RSA modulus
    n: Option<String>,
    /// RSA exponent
    e: Option<String>,
    /// EC curve
    crv: Option<String>,
    /// EC x coordinate
    x: Option<String>,
    /// EC y coordinate
    y: Option<String>,
}

/// A verification key ready for use
#[derive(Clone)]
pub struct VerificationKey {
    /// Algorithm the key verifies
    pub algorithm: Algorithm,
    /// The decoding key
    pub key: DecodingKey,
}

struct KeyCache {
    keys: HashMap<String, VerificationKey>,
    fetched_at: Instant,
}

/// Cached JWKS keys with background-friendly refresh.
pub struct JwksKeys {
    url: String,
    client: reqwest::Client,
    cache: Arc<RwLock<Option<KeyCache>>>,
}

impl JwksKeys {
    /// Create a key store fetching from the given JWKS URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            cache: Arc::new(RwLock::new(None)),
        }
    }

    /// Get a key by kid, refreshing the cache when stale.
    ///
    /// With no kid, the first cached key is returned.
    pub async fn get_key(&self, kid: Option<&str>) -> Result<VerificationKey, HttpError> {
        let needs_refresh = {
            let cache = self.cache.read();
            match &*cache {
                None => true,
                Some(c) => c.fetched_at.elapsed() > REFRESH_INTERVAL,
            }
        };

        if needs_refresh {
            if let Err(e) = self.refresh().await {
                // keep serving stale keys if we have any
                if self.cache.read().is_none() {
                    return Err(e);
                }
                warn!(error = %e, "JWKS refresh failed, using cached keys");
            }
        }

        let cache = self.cache.read();
        let cache = cache
            .as_ref()
            .ok_or_else(|| HttpError::internal("keys not loaded", ""))?;

        let key = match kid {
            Some(kid) => cache.keys.get(kid).cloned(),
            None => cache.keys.values().next().cloned(),
        };

        key.ok_or_else(|| {
            HttpError::unauthorized(
                "unable to extract claims from token",
                format!("no matching key found for kid {:?}", kid),
            )
        })
    }

    /// Fetch the JWKS document and rebuild the key index
    pub async fn refresh(&self) -> Result<(), HttpError> {
        debug!(url = %self.url, "fetching JWKS");

        let jwks: JwksDocument = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| HttpError::internal(format!("failed to fetch JWKS: {}", e), ""))?
            .json()
            .await
            .map_err(|e| HttpError::internal(format!("invalid JWKS response: {}", e), ""))?;

        let mut keys = HashMap::new();
        for jwk in jwks.keys {
            if let Some(key) = jwk_to_verification_key(&jwk)? {
                let kid = jwk.kid.unwrap_or_else(|| "default".to_string());
                keys.insert(kid, key);
            }
        }

        if keys.is_empty() {
            return Err(HttpError::internal("no usable keys found in JWKS", ""));
        }

        info!(key_count = keys.len(), "refreshed JWKS key cache");

        let mut cache = self.cache.write();
        *cache = Some(KeyCache {
            keys,
            fetched_at: Instant::now(),
        });

        Ok(())
    }

    /// Install keys directly, bypassing the fetch. Used at startup with
    /// pre-fetched keys and by tests.
    pub fn install_keys(&self, keys: Vec<(String, VerificationKey)>) {
        let mut cache = self.cache.write();
        *cache = Some(KeyCache {
            keys: keys.into_iter().collect(),
            fetched_at: Instant::now(),
        });
    }
}

/// Convert a JWK to a verification key; unsupported key types are skipped
fn jwk_to_verification_key(jwk: &JwkKey) -> Result<Option<VerificationKey>, HttpError> {
    match jwk.kty.as_str() {
        "RSA" => {
            let n = jwk
                .n
                .as_ref()
                .ok_or_else(|| HttpError::internal("RSA key missing 'n'", ""))?;
            let e = jwk
                .e
                .as_ref()
                .ok_or_else(|| HttpError::internal("RSA key missing 'e'", ""))?;

            let algorithm = match jwk.alg.as_deref() {
                Some("RS384") => Algorithm::RS384,
                Some("RS512") => Algorithm::RS512,
                _ => Algorithm::RS256,
            };

            let key = DecodingKey::from_rsa_components(n, e)
                .map_err(|e| HttpError::internal(format!("invalid RSA key: {}", e), ""))?;
            Ok(Some(VerificationKey { algorithm, key }))
        }
        "EC" => {
            let x = jwk
                .x
                .as_ref()
                .ok_or_else(|| HttpError::internal("EC key missing 'x'", ""))?;
            let y = jwk
                .y
                .as_ref()
                .ok_or_else(|| HttpError::internal("EC key missing 'y'", ""))?;

            let algorithm = match jwk.crv.as_deref() {
                Some("P-256") => Algorithm::ES256,
                Some("P-384") => Algorithm::ES384,
                Some(crv) => {
                    warn!(crv = %crv, "unsupported EC curve");
                    return Ok(None);
                }
                None => return Ok(None),
            };

            let key = DecodingKey::from_ec_components(x, y)
                .map_err(|e| HttpError::internal(format!("invalid EC key: {}", e), ""))?;
            Ok(Some(VerificationKey { algorithm, key }))
        }
        kty => {
            warn!(kty = %kty, "unsupported key type");
            Ok(None)
        }
    }
}
