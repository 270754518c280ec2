//! Bearer token validation.
//!
//! # Validation flow
//!
//! 1. Look the SHA-256 of the raw token up in the [`TokenCache`]; a hit skips
//!    every later step.
//! 2. Decode the header (unverified) for `kid` and `alg`.
//! 3. Obtain the provider key set from the [`JwksCache`] and pick the key for
//!    `kid`, falling back to the first key in the set.
//! 4. Verify the signature, `iss` and `aud` in a single `jsonwebtoken::decode`.
//! 5. Require `exp` and accept the token while `now <= exp + clock_skew`.
//! 6. Normalize claims into a [`User`] and cache it.
//!
//! In skip-verification mode, steps 3-4 are replaced by decoding the payload
//! without any check. That mode exists for local development against a
//! throwaway provider and is refused in production.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Header, Validation};
use serde::Serialize;
use tracing::{debug, warn};

use super::claims::{self, TokenClaims};
use super::jwks::{HttpKeyFetcher, JwksCache, KeyFetcher, KeySet};
use super::token_cache::{TokenCache, TokenCacheStats};
use super::user::User;
use crate::Result;
use crate::authz::Environment;
use crate::config::OidcConfig;

/// Why a bearer token was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Bad signature, expired beyond the skew window, or malformed.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// A required claim is absent.
    #[error("missing required claim: {0}")]
    MissingClaim(String),

    /// Provider keys could not be obtained and nothing usable is cached.
    #[error("identity provider unavailable: {0}")]
    ProviderUnavailable(String),
}

impl ValidationError {
    /// HTTP status the caller should answer with.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidToken(_) | Self::MissingClaim(_) => 401,
            Self::ProviderUnavailable(_) => 503,
        }
    }

    /// Message safe to show end users: no internal detail.
    #[must_use]
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::InvalidToken(_) | Self::MissingClaim(_) => "unauthorized",
            Self::ProviderUnavailable(_) => "identity provider unavailable",
        }
    }
}

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValidatorStats {
    /// Validated-token cache counters
    pub token_cache: TokenCacheStats,
    /// Signature verifications performed
    pub verifications: u64,
    /// JWKS fetch attempts
    pub jwks_fetches: u64,
}

/// OIDC bearer token validator bound to one provider.
///
/// Owns its JWKS and token caches; there is no process-wide state, so two
/// validators never observe each other's keys or tokens.
pub struct TokenValidator {
    issuer: String,
    audience: String,
    role_claim: Option<String>,
    skip_verification: bool,
    clock_skew: Duration,
    token_cache_ttl: Duration,
    jwks: JwksCache,
    tokens: TokenCache,
    verifications: AtomicU64,
}

impl TokenValidator {
    /// Build a validator that fetches keys from the configured provider.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if the settings are unusable in
    /// `environment` (see [`OidcConfig::check`]), or an HTTP error if the
    /// client cannot be built.
    pub fn new(config: &OidcConfig, environment: Environment) -> Result<Self> {
        let fetcher = HttpKeyFetcher::new(&config.provider_url, config.http_timeout)?;
        Self::with_fetcher(config, environment, Arc::new(fetcher))
    }

    /// Build a validator around an explicit key source.
    ///
    /// # Errors
    ///
    /// Same configuration checks as [`TokenValidator::new`].
    pub fn with_fetcher(
        config: &OidcConfig,
        environment: Environment,
        fetcher: Arc<dyn KeyFetcher>,
    ) -> Result<Self> {
        config.check(environment)?;

        if config.skip_verification {
            warn!(
                environment = %environment,
                "OIDC SIGNATURE VERIFICATION IS DISABLED - any well-formed token will be accepted. \
                 Never use skip_verification outside local development."
            );
        }

        Ok(Self {
            issuer: config.provider_url.clone(),
            audience: config.audience().to_string(),
            role_claim: config.role_claim.clone().filter(|c| !c.is_empty()),
            skip_verification: config.skip_verification,
            clock_skew: config.clock_skew,
            token_cache_ttl: config.token_cache_ttl,
            jwks: JwksCache::new(fetcher, config.jwks_cache_ttl, config.http_timeout),
            tokens: TokenCache::new(config.token_cache_ttl),
            verifications: AtomicU64::new(0),
        })
    }

    /// Validate a bearer token and return the normalized user.
    pub async fn validate(&self, token: &str) -> std::result::Result<User, ValidationError> {
        self.validate_inner(token, None).await
    }

    /// Like [`validate`](Self::validate), bounding any provider call by
    /// `deadline`. A provider that does not answer in time, with no cached
    /// keys to fall back on, yields [`ValidationError::ProviderUnavailable`].
    pub async fn validate_within(
        &self,
        token: &str,
        deadline: Duration,
    ) -> std::result::Result<User, ValidationError> {
        self.validate_inner(token, Some(deadline)).await
    }

    /// The validator's JWKS cache.
    #[must_use]
    pub fn jwks(&self) -> &JwksCache {
        &self.jwks
    }

    /// Drop every cached validation result.
    pub fn clear_cache(&self) {
        self.tokens.clear();
    }

    /// Snapshot of cache and verification counters.
    #[must_use]
    pub fn stats(&self) -> ValidatorStats {
        ValidatorStats {
            token_cache: self.tokens.stats(),
            verifications: self.verifications.load(Ordering::Relaxed),
            jwks_fetches: self.jwks.fetch_count(),
        }
    }

    async fn validate_inner(
        &self,
        token: &str,
        deadline: Option<Duration>,
    ) -> std::result::Result<User, ValidationError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(ValidationError::InvalidToken("empty token".to_string()));
        }

        if let Some(user) = self.tokens.get(token) {
            debug!(sub = %user.sub, "Token cache hit");
            return Ok(user);
        }

        let header = jsonwebtoken::decode_header(token)
            .map_err(|e| ValidationError::InvalidToken(format!("malformed token header: {e}")))?;

        let claims = if self.skip_verification {
            decode_unverified(token)?
        } else {
            self.verify(token, &header, deadline).await?
        };

        let exp = claims
            .exp
            .ok_or_else(|| ValidationError::MissingClaim("exp".to_string()))?;
        check_expiry(exp, unix_now(), self.clock_skew)?;

        let user = claims::normalize(claims, self.role_claim.as_deref())?;

        let cache_until = exp_to_system_time(exp)
            .or_else(|| SystemTime::now().checked_add(self.token_cache_ttl));
        if let Some(cache_until) = cache_until {
            self.tokens.insert(token, user.clone(), cache_until);
        }

        debug!(sub = %user.sub, role = %user.role, "Validated bearer token");
        Ok(user)
    }

    async fn verify(
        &self,
        token: &str,
        header: &Header,
        deadline: Option<Duration>,
    ) -> std::result::Result<TokenClaims, ValidationError> {
        let keys = match deadline {
            Some(d) => self.jwks.get_keys_within(d).await,
            None => self.jwks.get_keys().await,
        }
        .map_err(|e| {
            ValidationError::ProviderUnavailable(format!("unable to fetch provider keys: {e}"))
        })?;

        let key = select_key(&keys, header.kid.as_deref())?;
        let algorithm = signing_algorithm(header.alg)?;

        let mut validation = Validation::new(algorithm);
        validation.leeway = 0;
        // Expiry is checked by hand so the skew window and the missing-`exp`
        // case follow one rule in both verified and insecure modes.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.set_required_spec_claims(&["iss", "aud"]);
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.audience.as_str()]);

        self.verifications.fetch_add(1, Ordering::Relaxed);
        jsonwebtoken::decode::<TokenClaims>(token, key, &validation)
            .map(|data| data.claims)
            .map_err(map_jwt_error)
    }
}

/// Pick the key for `kid`, or the first key in the set as a last resort.
fn select_key<'a>(
    keys: &'a KeySet,
    kid: Option<&str>,
) -> std::result::Result<&'a DecodingKey, ValidationError> {
    if let Some(key) = kid.and_then(|kid| keys.get(kid)) {
        return Ok(key);
    }
    let (fallback_kid, key) = keys
        .first()
        .ok_or_else(|| ValidationError::InvalidToken("no signing keys available".to_string()))?;
    warn!(
        kid = ?kid,
        fallback_kid = %fallback_kid,
        "Token kid not found in provider JWKS, falling back to first key"
    );
    Ok(key)
}

/// Only asymmetric algorithms are accepted; HMAC would let anyone holding a
/// public key forge tokens.
fn signing_algorithm(alg: Algorithm) -> std::result::Result<Algorithm, ValidationError> {
    match alg {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512
        | Algorithm::ES256
        | Algorithm::ES384
        | Algorithm::EdDSA => Ok(alg),
        other => Err(ValidationError::InvalidToken(format!(
            "unsupported signing algorithm: {other:?}"
        ))),
    }
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> ValidationError {
    match err.kind() {
        ErrorKind::InvalidSignature => ValidationError::InvalidToken("invalid signature".to_string()),
        ErrorKind::InvalidIssuer => ValidationError::InvalidToken("issuer mismatch".to_string()),
        ErrorKind::InvalidAudience => ValidationError::InvalidToken("audience mismatch".to_string()),
        ErrorKind::MissingRequiredClaim(claim) => ValidationError::MissingClaim(claim.clone()),
        _ => ValidationError::InvalidToken(err.to_string()),
    }
}

/// Decode the payload segment without any verification.
fn decode_unverified(token: &str) -> std::result::Result<TokenClaims, ValidationError> {
    let malformed = || ValidationError::InvalidToken("malformed token payload".to_string());

    let payload = token.split('.').nth(1).ok_or_else(malformed)?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|_| malformed())?;
    serde_json::from_slice(&bytes).map_err(|_| malformed())
}

/// Valid iff `now <= exp + skew`.
fn check_expiry(exp: f64, now: f64, skew: Duration) -> std::result::Result<(), ValidationError> {
    if now <= exp + skew.as_secs_f64() {
        Ok(())
    } else {
        Err(ValidationError::InvalidToken("token expired".to_string()))
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_secs_f64()
}

fn exp_to_system_time(exp: f64) -> Option<SystemTime> {
    let since_epoch = Duration::try_from_secs_f64(exp).ok()?;
    UNIX_EPOCH.checked_add(since_epoch)
}
