//! PKCE (RFC 7636) verifier and challenge generation.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngExt;
use serde::Serialize;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::{Error, Result};

/// The only challenge method this crate emits.
pub const CHALLENGE_METHOD: &str = "S256";

/// Shortest verifier RFC 7636 allows.
pub const MIN_VERIFIER_LEN: usize = 43;

/// Longest verifier RFC 7636 allows.
pub const MAX_VERIFIER_LEN: usize = 128;

/// Unreserved characters used for verifiers. Exactly 64 of them, so masking a
/// random byte with `0x3F` picks one without modulo bias.
const VERIFIER_ALPHABET: &[u8; 64] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// A fresh verifier and its derived challenge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PkceParams {
    /// Client-held secret, sent only to the token endpoint
    pub verifier: String,
    /// `BASE64URL(SHA256(verifier))`, sent with the authorization request
    pub challenge: String,
    /// Always `S256`
    pub challenge_method: &'static str,
}

impl PkceParams {
    /// Generate parameters with a verifier of `length` characters.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] unless `length` is within `43..=128`.
    pub fn generate(length: usize) -> Result<Self> {
        if !(MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&length) {
            return Err(Error::InvalidInput(format!(
                "PKCE verifier length must be between {MIN_VERIFIER_LEN} and {MAX_VERIFIER_LEN}, got {length}"
            )));
        }

        let mut verifier = String::with_capacity(length);
        while verifier.len() < length {
            let random_bytes: [u8; 32] = rand::rng().random();
            verifier.extend(
                random_bytes
                    .iter()
                    .take(length - verifier.len())
                    .map(|b| char::from(VERIFIER_ALPHABET[usize::from(b & 0x3F)])),
            );
        }

        let challenge = challenge(&verifier);
        Ok(Self {
            verifier,
            challenge,
            challenge_method: CHALLENGE_METHOD,
        })
    }
}

/// `BASE64URL-NOPAD(SHA256(verifier))`.
#[must_use]
pub fn challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// Check `verifier` against a previously issued `challenge` in constant time.
#[must_use]
pub fn verify(verifier: &str, challenge: &str) -> bool {
    let expected = self::challenge(verifier);
    expected.as_bytes().ct_eq(challenge.as_bytes()).into()
}

/// Random `state` value for CSRF binding: 32 bytes, base64url, 43 characters.
#[must_use]
pub fn generate_state() -> String {
    let state_bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(state_bytes)
}
