//! Configuration management

use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::authz::Environment;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Environment this service instance operates in
    pub environment: Environment,
    /// OIDC provider settings
    pub oidc: OidcConfig,
}

/// OIDC provider and validator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OidcConfig {
    /// Issuer base URL; tokens must carry exactly this `iss`
    pub provider_url: String,
    /// OAuth client id
    pub client_id: String,
    /// Expected `aud`; defaults to `client_id`
    pub audience: Option<String>,
    /// Client secret for confidential clients (literal or `env:VAR_NAME`)
    pub client_secret: Option<String>,
    /// Redirect URI registered with the provider
    pub redirect_uri: Option<String>,
    /// Scopes requested at login
    pub scopes: Vec<String>,
    /// Provider-namespaced role claim consulted when `role` is absent
    pub role_claim: Option<String>,
    /// Development only: accept tokens without checking signatures
    pub skip_verification: bool,
    /// How long a fetched JWKS is served before refreshing
    #[serde(with = "humantime_serde")]
    pub jwks_cache_ttl: Duration,
    /// Upper bound on how long a validated token is served from cache
    #[serde(with = "humantime_serde")]
    pub token_cache_ttl: Duration,
    /// Timeout for discovery, JWKS and token endpoint calls
    #[serde(with = "humantime_serde")]
    pub http_timeout: Duration,
    /// Grace period after `exp` during which a token is still accepted
    #[serde(with = "humantime_serde")]
    pub clock_skew: Duration,
}

fn default_scopes() -> Vec<String> {
    vec!["openid".to_string(), "profile".to_string(), "email".to_string()]
}

impl Default for OidcConfig {
    fn default() -> Self {
        Self {
            provider_url: String::new(),
            client_id: String::new(),
            audience: None,
            client_secret: None,
            redirect_uri: None,
            scopes: default_scopes(),
            role_claim: None,
            skip_verification: false,
            jwks_cache_ttl: Duration::from_secs(3600),
            token_cache_ttl: Duration::from_secs(300),
            http_timeout: Duration::from_secs(10),
            clock_skew: Duration::from_secs(30),
        }
    }
}

impl OidcConfig {
    /// Expected audience (`audience`, or `client_id` when unset or blank).
    #[must_use]
    pub fn audience(&self) -> &str {
        self.audience
            .as_deref()
            .filter(|a| !a.is_empty())
            .unwrap_or(&self.client_id)
    }

    /// Space-separated scope string for authorization requests.
    #[must_use]
    pub fn scope(&self) -> String {
        if self.scopes.is_empty() {
            default_scopes().join(" ")
        } else {
            self.scopes.join(" ")
        }
    }

    /// Resolve the client secret (expand `env:VAR_NAME`)
    #[must_use]
    pub fn resolve_client_secret(&self) -> Option<String> {
        self.client_secret.as_ref().map(|secret| {
            if let Some(var_name) = secret.strip_prefix("env:") {
                env::var(var_name).unwrap_or_else(|_| secret.clone())
            } else {
                secret.clone()
            }
        })
    }

    /// Check these settings are usable in `environment`.
    ///
    /// # Errors
    ///
    /// Refuses `skip_verification` in production, and requires a provider URL
    /// and client id whenever signatures are verified.
    pub fn check(&self, environment: Environment) -> Result<()> {
        if self.skip_verification {
            if environment == Environment::Prod {
                return Err(Error::Config(
                    "oidc.skip_verification cannot be enabled in the prod environment".to_string(),
                ));
            }
            return Ok(());
        }
        if self.provider_url.trim().is_empty() {
            return Err(Error::Config("oidc.provider_url is required".to_string()));
        }
        if self.client_id.trim().is_empty() {
            return Err(Error::Config("oidc.client_id is required".to_string()));
        }
        Ok(())
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (ROUTEROS_MCP_ prefix)
        figment = figment.merge(Env::prefixed("ROUTEROS_MCP_").split("__"));

        let mut config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment (before env var expansion)
        config.load_env_files();
        config.expand_env_vars()?;

        Ok(config)
    }

    /// Check the loaded configuration is coherent.
    ///
    /// # Errors
    ///
    /// See [`OidcConfig::check`].
    pub fn validate(&self) -> Result<()> {
        self.oidc.check(self.environment)
    }

    /// Load `env_files` into the process environment, in order.
    /// A leading `~` means the home directory; missing files are skipped.
    fn load_env_files(&self) {
        for entry in &self.env_files {
            let path = expand_home(entry);
            if !path.is_file() {
                tracing::debug!(path = %path.display(), "Env file not found, skipping");
                continue;
            }
            if let Err(e) = dotenvy::from_path(&path) {
                tracing::warn!(path = %path.display(), error = %e, "Failed to load env file");
            } else {
                tracing::info!(path = %path.display(), "Loaded env file");
            }
        }
    }

    /// Expand ${VAR} and ${VAR:-default} patterns in OIDC string settings
    fn expand_env_vars(&mut self) -> Result<()> {
        let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]*))?\}")
            .map_err(|e| Error::Config(e.to_string()))?;

        let oidc = &mut self.oidc;
        for value in [&mut oidc.provider_url, &mut oidc.client_id] {
            *value = expand_string(&re, value);
        }
        for value in [
            &mut oidc.audience,
            &mut oidc.client_secret,
            &mut oidc.redirect_uri,
        ]
        .into_iter()
        .flatten()
        {
            *value = expand_string(&re, value);
        }
        Ok(())
    }
}

/// Resolve a leading `~` against the home directory. Paths without one, or
/// with no known home, are returned as given.
fn expand_home(entry: &str) -> PathBuf {
    match (entry.strip_prefix('~'), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest.trim_start_matches('/')),
        _ => PathBuf::from(entry),
    }
}

/// Substitute `${VAR}` and `${VAR:-default}` references. Unset variables
/// without a default become empty.
fn expand_string(re: &Regex, value: &str) -> String {
    re.replace_all(value, |caps: &regex::Captures| {
        env::var(&caps[1])
            .ok()
            .or_else(|| caps.get(2).map(|fallback| fallback.as_str().to_string()))
            .unwrap_or_default()
    })
    .into_owned()
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to human-readable string (`"30s"`, or `"250ms"` for
    /// sub-second precision)
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration string (e.g., "30s", "5m", "1h", "100ms")
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the string cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        parse(&s).map_err(serde::de::Error::custom)
    }

    /// Parse `"100ms"`, `"30s"`, `"5m"`, `"1h"` or a bare number of seconds.
    ///
    /// # Errors
    ///
    /// Returns a message for non-numeric input and for minute or hour counts
    /// that overflow `u64` seconds.
    pub fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        // "ms" must be checked before "s" and "m"
        if let Some(ms) = s.strip_suffix("ms") {
            return number(ms).map(Duration::from_millis);
        }
        let (value, unit_secs) = if let Some(secs) = s.strip_suffix('s') {
            (secs, 1)
        } else if let Some(mins) = s.strip_suffix('m') {
            (mins, 60)
        } else if let Some(hours) = s.strip_suffix('h') {
            (hours, 3600)
        } else {
            (s, 1)
        };
        number(value)?
            .checked_mul(unit_secs)
            .map(Duration::from_secs)
            .ok_or_else(|| format!("duration {s:?} is too large"))
    }

    fn number(s: &str) -> Result<u64, String> {
        s.trim()
            .parse::<u64>()
            .map_err(|e| format!("invalid duration {s:?}: {e}"))
    }
}
