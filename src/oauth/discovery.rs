//! OpenID Connect discovery (`/.well-known/openid-configuration`).

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Subset of the OpenID Provider Metadata this crate consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderMetadata {
    /// Issuer identifier
    pub issuer: String,

    /// JWKS document URL
    pub jwks_uri: String,

    /// Authorization endpoint (optional; `{issuer}/authorize` is assumed otherwise)
    #[serde(default)]
    pub authorization_endpoint: Option<String>,

    /// Token endpoint (optional; `{issuer}/token` is assumed otherwise)
    #[serde(default)]
    pub token_endpoint: Option<String>,

    /// Supported PKCE code challenge methods
    #[serde(default)]
    pub code_challenge_methods_supported: Vec<String>,
}

/// Strip exactly one trailing slash from an issuer URL.
///
/// `https://idp/` becomes `https://idp`; `https://idp//` keeps one slash, so a
/// path joined onto it is never silently collapsed.
#[must_use]
pub fn issuer_base(issuer: &str) -> &str {
    issuer.strip_suffix('/').unwrap_or(issuer)
}

/// Discovery document URL for `issuer`.
#[must_use]
pub fn discovery_url(issuer: &str) -> String {
    format!("{}/.well-known/openid-configuration", issuer_base(issuer))
}

impl ProviderMetadata {
    /// Fetch the discovery document for `issuer`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OAuth`] if the endpoint is unreachable, answers with a
    /// non-success status, or returns a document without `jwks_uri`.
    pub async fn discover(client: &Client, issuer: &str) -> Result<Self> {
        let url = discovery_url(issuer);
        debug!(url = %url, "Fetching OIDC discovery document");

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::OAuth(format!("Failed to fetch discovery document: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::OAuth(format!(
                "OIDC discovery failed: HTTP {}",
                response.status()
            )));
        }

        let metadata: Self = response
            .json()
            .await
            .map_err(|e| Error::OAuth(format!("Failed to parse discovery document: {e}")))?;

        debug!(issuer = %metadata.issuer, jwks_uri = %metadata.jwks_uri, "Discovered OIDC provider");
        Ok(metadata)
    }

    /// Token endpoint, falling back to `{issuer}/token`.
    #[must_use]
    pub fn token_endpoint_or_default(&self) -> String {
        self.token_endpoint
            .clone()
            .unwrap_or_else(|| format!("{}/token", issuer_base(&self.issuer)))
    }

    /// Check if PKCE is supported (S256 method)
    #[must_use]
    pub fn supports_pkce(&self) -> bool {
        self.code_challenge_methods_supported
            .iter()
            .any(|m| m == "S256")
    }
}
