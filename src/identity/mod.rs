//! Identity: OIDC bearer token validation and the normalized [`User`].

mod claims;
pub mod jwks;
pub mod token_cache;
pub mod user;
pub mod validator;

pub use jwks::{HttpKeyFetcher, JwksCache, JwksError, KeyFetcher, KeySet};
pub use token_cache::{TokenCache, TokenCacheStats};
pub use user::{DeviceScope, User, UserRole};
pub use validator::{TokenValidator, ValidationError, ValidatorStats};
