//! Token endpoint calls: authorization-code exchange and refresh.
//!
//! Response bodies carry live credentials and are never logged; error
//! messages include the provider's body only for non-success statuses, where
//! it holds an OAuth error object rather than tokens.

use std::fmt;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::discovery::{ProviderMetadata, issuer_base};
use crate::config::OidcConfig;
use crate::{Error, Result};

/// Successful token endpoint response.
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    /// Access token
    pub access_token: String,
    /// Token type (usually `Bearer`)
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds
    #[serde(default)]
    pub expires_in: Option<u64>,
    /// Refresh token, if issued
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// OIDC ID token, if issued
    #[serde(default)]
    pub id_token: Option<String>,
    /// Granted scope
    #[serde(default)]
    pub scope: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<redacted>")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("id_token", &self.id_token.as_ref().map(|_| "<redacted>"))
            .field("scope", &self.scope)
            .finish()
    }
}

/// Client for one provider's token endpoint.
#[derive(Clone)]
pub struct TokenClient {
    http: Client,
    token_endpoint: String,
    client_id: String,
    client_secret: Option<String>,
}

impl fmt::Debug for TokenClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenClient")
            .field("token_endpoint", &self.token_endpoint)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl TokenClient {
    /// Client posting to an explicit token endpoint.
    pub fn new(http: Client, token_endpoint: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            http,
            token_endpoint: token_endpoint.into(),
            client_id: client_id.into(),
            client_secret: None,
        }
    }

    /// Client posting to `{issuer}/token`, without discovery.
    pub fn for_issuer(http: Client, issuer: &str, client_id: impl Into<String>) -> Self {
        Self::new(http, format!("{}/token", issuer_base(issuer)), client_id)
    }

    /// Client for the configured provider, posting to `{issuer}/token` and
    /// authenticating with `client_secret` (after `env:` resolution) if set.
    pub fn from_config(http: Client, config: &OidcConfig) -> Self {
        Self::for_issuer(http, &config.provider_url, config.client_id.clone())
            .with_client_secret(config.resolve_client_secret())
    }

    /// Client posting to the token endpoint named by the provider's discovery
    /// document, or `{issuer}/token` if it names none.
    pub async fn discover(http: Client, issuer: &str, client_id: impl Into<String>) -> Result<Self> {
        let metadata = ProviderMetadata::discover(&http, issuer).await?;
        Ok(Self::new(http, metadata.token_endpoint_or_default(), client_id))
    }

    /// Authenticate as a confidential client.
    #[must_use]
    pub fn with_client_secret(mut self, secret: Option<String>) -> Self {
        self.client_secret = secret.filter(|s| !s.is_empty());
        self
    }

    /// Token endpoint this client posts to.
    #[must_use]
    pub fn token_endpoint(&self) -> &str {
        &self.token_endpoint
    }

    /// Exchange an authorization code, proving possession with the PKCE
    /// `code_verifier`.
    pub async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("code_verifier", code_verifier),
        ];
        self.post("Token exchange", &params).await
    }

    /// Obtain a new access token with a refresh token.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let params = [("grant_type", "refresh_token"), ("refresh_token", refresh_token)];
        self.post("Token refresh", &params).await
    }

    async fn post(&self, operation: &str, grant: &[(&str, &str)]) -> Result<TokenResponse> {
        let mut form: Vec<(&str, &str)> = grant.to_vec();
        form.push(("client_id", &self.client_id));
        if let Some(secret) = &self.client_secret {
            form.push(("client_secret", secret));
        }

        debug!(endpoint = %self.token_endpoint, operation, "Calling token endpoint");

        let response = self
            .http
            .post(&self.token_endpoint)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::OAuth(format!("{operation} request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::OAuth(format!(
                "{operation} failed: HTTP {status} - {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::OAuth(format!("Failed to parse {operation} response: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_endpoint_defaults_to_issuer_relative() {
        let client = TokenClient::for_issuer(Client::new(), "https://idp.example.net/", "c");
        assert_eq!(client.token_endpoint(), "https://idp.example.net/token");
    }

    #[test]
    fn debug_output_redacts_credentials() {
        let response: TokenResponse = serde_json::from_str(
            r#"{"access_token":"at-secret","refresh_token":"rt-secret","expires_in":300}"#,
        )
        .unwrap();
        let printed = format!("{response:?}");
        assert!(!printed.contains("at-secret"));
        assert!(!printed.contains("rt-secret"));
        assert!(printed.contains("300"));

        let client = TokenClient::for_issuer(Client::new(), "https://idp", "c")
            .with_client_secret(Some("shh".to_string()));
        assert!(!format!("{client:?}").contains("shh"));
    }

    #[test]
    fn config_secret_reference_is_resolved() {
        let config = OidcConfig {
            provider_url: "https://idp.example.net".to_string(),
            client_id: "routeros-mcp".to_string(),
            client_secret: Some("env:PATH".to_string()),
            ..Default::default()
        };

        let client = TokenClient::from_config(Client::new(), &config);

        assert_eq!(client.token_endpoint(), "https://idp.example.net/token");
        assert_eq!(client.client_id, "routeros-mcp");
        let expected = std::env::var("PATH").unwrap_or_else(|_| "env:PATH".to_string());
        assert_eq!(client.client_secret, Some(expected).filter(|s| !s.is_empty()));
    }

    #[test]
    fn empty_client_secret_is_ignored() {
        let client = TokenClient::for_issuer(Client::new(), "https://idp", "c")
            .with_client_secret(Some(String::new()));
        assert!(client.client_secret.is_none());
    }
}
