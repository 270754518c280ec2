//! Authorization-code request URL construction.
//!
//! The builder never stores `state`; it hands it back alongside the URL so
//! the caller can bind it to its own CSRF storage.

use serde::Serialize;
use url::Url;

use super::discovery::issuer_base;
use super::pkce::{self, CHALLENGE_METHOD, MIN_VERIFIER_LEN, PkceParams};
use crate::{Error, Result};

/// Scope requested when the caller does not name one.
pub const DEFAULT_SCOPE: &str = "openid profile email";

/// A ready-to-redirect authorization URL and the secrets bound to it.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationUrl {
    /// Full `{issuer}/authorize?...` URL
    pub url: String,
    /// CSRF state echoed back by the provider on the redirect
    pub state: String,
    /// PKCE parameters; the verifier is needed for the code exchange
    pub pkce: PkceParams,
}

/// Builder for an OIDC authorization-code request with PKCE.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    issuer: String,
    client_id: String,
    redirect_uri: String,
    scope: String,
    pkce: Option<PkceParams>,
    state: Option<String>,
    extra: Vec<(String, String)>,
}

impl AuthorizationRequest {
    /// Start a request for `client_id` against `issuer`.
    pub fn new(
        issuer: impl Into<String>,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            issuer: issuer.into(),
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scope: DEFAULT_SCOPE.to_string(),
            pkce: None,
            state: None,
            extra: Vec::new(),
        }
    }

    /// Override the requested scope.
    #[must_use]
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }

    /// Use explicit PKCE parameters instead of generating fresh ones.
    #[must_use]
    pub fn pkce(mut self, pkce: PkceParams) -> Self {
        self.pkce = Some(pkce);
        self
    }

    /// Use an explicit `state` instead of a random one.
    #[must_use]
    pub fn state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Append an extra query parameter, passed through verbatim.
    #[must_use]
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.push((key.into(), value.into()));
        self
    }

    /// Build the URL.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] if the issuer does not form a valid URL.
    pub fn build(self) -> Result<AuthorizationUrl> {
        let endpoint = format!("{}/authorize", issuer_base(&self.issuer));
        let mut url = Url::parse(&endpoint)
            .map_err(|e| Error::InvalidInput(format!("invalid issuer URL '{}': {e}", self.issuer)))?;

        let pkce = match self.pkce {
            Some(pkce) => pkce,
            None => PkceParams::generate(MIN_VERIFIER_LEN)?,
        };
        let state = self.state.unwrap_or_else(pkce::generate_state);

        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.client_id)
            .append_pair("redirect_uri", &self.redirect_uri)
            .append_pair("scope", &self.scope)
            .append_pair("code_challenge", &pkce.challenge)
            .append_pair("code_challenge_method", CHALLENGE_METHOD)
            .append_pair("state", &state)
            .extend_pairs(self.extra.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        Ok(AuthorizationUrl {
            url: url.into(),
            state,
            pkce,
        })
    }
}
