//! OAuth 2.0 / OIDC login helpers.
//!
//! - [`pkce`]: verifier and S256 challenge generation
//! - [`authorize`]: authorization URL construction
//! - [`exchange`]: token endpoint calls
//! - [`discovery`]: provider metadata

pub mod authorize;
pub mod discovery;
pub mod exchange;
pub mod pkce;

pub use authorize::{AuthorizationRequest, AuthorizationUrl, DEFAULT_SCOPE};
pub use discovery::ProviderMetadata;
pub use exchange::{TokenClient, TokenResponse};
pub use pkce::PkceParams;
