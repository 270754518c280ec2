//! RouterOS MCP auth core
//!
//! Identity and access control for the RouterOS MCP control plane.
//!
//! # Features
//!
//! - **Token validation**: OIDC bearer tokens verified against the provider's
//!   JWKS (signature, issuer, audience, expiry with clock skew)
//! - **Caching**: single-flight JWKS refresh with stale fallback, and a
//!   validated-token cache keyed by token hash
//! - **Login helpers**: PKCE, authorization URLs, code exchange and refresh
//! - **Authorization**: role, tool tier, device scope, environment isolation
//!   and per-device capability flags, with every decision audited
//!
//! # Example
//!
//! ```no_run
//! use routeros_mcp_auth::authz::{AuthorizationEngine, Device, Environment, ToolTier};
//! use routeros_mcp_auth::config::OidcConfig;
//! use routeros_mcp_auth::identity::TokenValidator;
//!
//! # async fn run(token: &str) -> routeros_mcp_auth::Result<()> {
//! let oidc = OidcConfig {
//!     provider_url: "https://idp.example.net/realms/ops".to_string(),
//!     client_id: "routeros-mcp".to_string(),
//!     ..Default::default()
//! };
//! let validator = TokenValidator::new(&oidc, Environment::Lab)?;
//! let engine = AuthorizationEngine::new(Environment::Lab);
//!
//! let user = validator.validate(token).await?;
//! let device = Device::new("rtr-1", Environment::Lab);
//! let decision = engine.authorize(&user, "interface/print", ToolTier::Fundamental, &device);
//! assert!(decision.is_allowed());
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod audit;
pub mod authz;
pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod oauth;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
///
/// `RUST_LOG` overrides `level`; `format` selects `json` or plain text.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        _ => subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .try_init(),
    }
    .map_err(|e| Error::Config(format!("Failed to install tracing subscriber: {e}")))
}
