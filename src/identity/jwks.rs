//! JWKS retrieval and caching.
//!
//! # Refresh discipline
//!
//! ```text
//! get_keys()
//!   -> fresh cached set?            return it, no I/O
//!   -> acquire refresh lock         (one refresh in flight per cache,
//!                                    bounded by the caller's deadline)
//!   -> fresh now?                   the winner refreshed while we waited
//!   -> another attempt finished?    it failed; serve stale or Unavailable
//!   -> fetch (discovery + JWKS)     bounded by the tighter of the caller's
//!                                    deadline and the fetch timeout
//!        ok    -> replace the whole set, reset expiry
//!        error -> serve the stale set if there is one, else Unavailable
//!        caller deadline hit -> same, but the next waiter fetches again
//! ```
//!
//! The set is replaced wholesale on success and never merged key-by-key. A
//! failed refresh leaves the previous set in place, so a transient provider
//! outage degrades to stale keys instead of rejecting every token.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, PublicKeyUse};
use parking_lot::RwLock;
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::oauth::discovery::ProviderMetadata;
use crate::{Error, Result};

/// The JWKS cache could not produce any key set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JwksError {
    /// Fetch failed and nothing (not even a stale set) is cached.
    #[error("provider keys unavailable: {0}")]
    Unavailable(String),
}

/// Source of a provider's JWKS document.
#[async_trait::async_trait]
pub trait KeyFetcher: Send + Sync {
    /// Fetch the current key set.
    async fn fetch(&self) -> Result<JwkSet>;
}

/// Fetches keys over HTTP: OIDC discovery for `jwks_uri`, then the JWKS itself.
pub struct HttpKeyFetcher {
    http: Client,
    issuer: String,
}

impl HttpKeyFetcher {
    /// Build a fetcher for `issuer` whose requests time out after `timeout`.
    pub fn new(issuer: impl Into<String>, timeout: Duration) -> Result<Self> {
        let issuer = issuer.into();
        if !issuer.starts_with("https://") {
            warn!(issuer = %issuer, "OIDC issuer is not HTTPS");
        }
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, issuer })
    }
}

#[async_trait::async_trait]
impl KeyFetcher for HttpKeyFetcher {
    async fn fetch(&self) -> Result<JwkSet> {
        let metadata = ProviderMetadata::discover(&self.http, &self.issuer).await?;

        debug!(jwks_uri = %metadata.jwks_uri, "Fetching JWKS");
        let response = self
            .http
            .get(&metadata.jwks_uri)
            .send()
            .await
            .map_err(|e| Error::OAuth(format!("Failed to fetch JWKS: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::OAuth(format!(
                "JWKS fetch failed: HTTP {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::OAuth(format!("Failed to parse JWKS: {e}")))
    }
}

/// Imported public keys indexed by key id, in document order.
#[derive(Clone, Default)]
pub struct KeySet {
    keys: HashMap<String, DecodingKey>,
    order: Vec<String>,
}

impl KeySet {
    /// Import every usable signing key from a JWKS document.
    ///
    /// Keys without a `kid`, encryption keys and symmetric keys are skipped.
    #[must_use]
    pub fn from_jwks(jwks: &JwkSet) -> Self {
        let mut set = Self::default();
        for jwk in &jwks.keys {
            let Some(kid) = jwk.common.key_id.as_deref() else {
                debug!("Skipping JWK without kid");
                continue;
            };
            if matches!(jwk.common.public_key_use, Some(PublicKeyUse::Encryption)) {
                debug!(kid = %kid, "Skipping encryption JWK");
                continue;
            }
            match import_key(jwk) {
                Some(key) => {
                    if set.keys.insert(kid.to_string(), key).is_none() {
                        set.order.push(kid.to_string());
                    }
                }
                None => warn!(kid = %kid, "Skipping JWK that cannot be imported"),
            }
        }
        set
    }

    /// Key for `kid`, if present.
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<&DecodingKey> {
        self.keys.get(kid)
    }

    /// First key in document order.
    #[must_use]
    pub fn first(&self) -> Option<(&str, &DecodingKey)> {
        let kid = self.order.first()?;
        self.keys.get(kid).map(|key| (kid.as_str(), key))
    }

    /// Key ids in document order.
    pub fn key_ids(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Number of imported keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if no key could be imported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl fmt::Debug for KeySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeySet").field("kids", &self.order).finish()
    }
}

fn import_key(jwk: &Jwk) -> Option<DecodingKey> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => DecodingKey::from_rsa_components(&rsa.n, &rsa.e).ok(),
        AlgorithmParameters::EllipticCurve(ec) => {
            DecodingKey::from_ec_components(&ec.x, &ec.y).ok()
        }
        AlgorithmParameters::OctetKeyPair(okp) => DecodingKey::from_ed_components(&okp.x).ok(),
        AlgorithmParameters::OctetKey(_) => None,
    }
}

struct CachedJwks {
    keys: Arc<KeySet>,
    /// `None` when the TTL is too large to represent; the set never expires.
    expires_at: Option<Instant>,
}

/// Per-validator JWKS cache with single-flight refresh and stale fallback.
pub struct JwksCache {
    fetcher: Arc<dyn KeyFetcher>,
    ttl: Duration,
    fetch_timeout: Duration,
    cached: RwLock<Option<CachedJwks>>,
    refresh_lock: Mutex<()>,
    /// Completed fetch attempts, successful or not.
    attempts: AtomicU64,
}

impl JwksCache {
    /// Create an empty cache.
    ///
    /// `ttl` bounds how long a fetched set is served without refreshing;
    /// `fetch_timeout` is the default deadline for one refresh.
    #[must_use]
    pub fn new(fetcher: Arc<dyn KeyFetcher>, ttl: Duration, fetch_timeout: Duration) -> Self {
        Self {
            fetcher,
            ttl,
            fetch_timeout,
            cached: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            attempts: AtomicU64::new(0),
        }
    }

    /// Return the provider's keys, refreshing if the cached set has expired.
    pub async fn get_keys(&self) -> std::result::Result<Arc<KeySet>, JwksError> {
        self.refresh(None).await
    }

    /// Like [`get_keys`](Self::get_keys), but gives up once `timeout` has
    /// elapsed, including time spent waiting on another caller's refresh.
    ///
    /// Running out of this caller's own budget does not count as a failed
    /// refresh round, so callers still waiting on the lock fetch for
    /// themselves.
    pub async fn get_keys_within(
        &self,
        timeout: Duration,
    ) -> std::result::Result<Arc<KeySet>, JwksError> {
        self.refresh(Some(timeout)).await
    }

    async fn refresh(
        &self,
        deadline: Option<Duration>,
    ) -> std::result::Result<Arc<KeySet>, JwksError> {
        if let Some(keys) = self.fresh_keys() {
            return Ok(keys);
        }

        let started = Instant::now();
        let seen = self.attempts.load(Ordering::Acquire);
        let _guard = match deadline {
            Some(limit) => match tokio::time::timeout(limit, self.refresh_lock.lock()).await {
                Ok(guard) => guard,
                Err(_) => {
                    return self.fallback(&format!(
                        "key fetch timed out after {}ms waiting on a concurrent refresh",
                        limit.as_millis()
                    ));
                }
            },
            None => self.refresh_lock.lock().await,
        };

        if let Some(keys) = self.fresh_keys() {
            debug!("JWKS refreshed by a concurrent caller");
            return Ok(keys);
        }
        if self.attempts.load(Ordering::Acquire) != seen {
            return self.fallback("concurrent refresh failed");
        }

        // The caller's remaining budget only matters when it is tighter than
        // the cache's own fetch timeout.
        let remaining = deadline.map(|limit| limit.saturating_sub(started.elapsed()));
        let caller_bound = remaining.filter(|left| *left < self.fetch_timeout);
        let budget = caller_bound.unwrap_or(self.fetch_timeout);

        let outcome = match tokio::time::timeout(budget, self.fetcher.fetch()).await {
            Ok(Ok(jwks)) => {
                let set = KeySet::from_jwks(&jwks);
                if set.is_empty() {
                    Err("provider returned no usable signing keys".to_string())
                } else {
                    Ok(set)
                }
            }
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) if caller_bound.is_some() => {
                // Leave the round open: the provider may be healthy.
                let limit = deadline.unwrap_or(budget);
                return self.fallback(&format!(
                    "key fetch timed out after {}ms",
                    limit.as_millis()
                ));
            }
            Err(_) => Err(format!("key fetch timed out after {}ms", budget.as_millis())),
        };
        self.attempts.fetch_add(1, Ordering::AcqRel);

        match outcome {
            Ok(set) => {
                info!(keys = set.len(), "Refreshed provider JWKS");
                let keys = Arc::new(set);
                *self.cached.write() = Some(CachedJwks {
                    keys: Arc::clone(&keys),
                    expires_at: Instant::now().checked_add(self.ttl),
                });
                Ok(keys)
            }
            Err(reason) => self.fallback(&reason),
        }
    }

    /// Drop the cached set. The next call fetches again.
    pub fn clear(&self) {
        *self.cached.write() = None;
    }

    /// Number of completed fetch attempts.
    #[must_use]
    pub fn fetch_count(&self) -> u64 {
        self.attempts.load(Ordering::Acquire)
    }

    fn fresh_keys(&self) -> Option<Arc<KeySet>> {
        let cached = self.cached.read();
        cached
            .as_ref()
            .filter(|c| c.expires_at.is_none_or(|at| Instant::now() < at))
            .map(|c| Arc::clone(&c.keys))
    }

    fn fallback(&self, reason: &str) -> std::result::Result<Arc<KeySet>, JwksError> {
        if let Some(cached) = self.cached.read().as_ref() {
            warn!(reason = %reason, "JWKS refresh failed, serving stale keys");
            return Ok(Arc::clone(&cached.keys));
        }
        warn!(reason = %reason, "JWKS refresh failed and no keys are cached");
        Err(JwksError::Unavailable(reason.to_string()))
    }
}
