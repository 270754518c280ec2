//! Error types for the RouterOS MCP auth core

use std::io;

use thiserror::Error;

use crate::identity::ValidationError;

/// Result type alias for the auth core
pub type Result<T> = std::result::Result<T, Error>;

/// Crate-level errors for configuration, PKCE and OAuth helpers.
///
/// Token validation and authorization have their own closed taxonomies
/// ([`ValidationError`] and [`crate::authz::Decision`]); this enum only wraps
/// them where a caller mixes the two worlds (the CLI, mostly).
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller supplied an out-of-range or malformed argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Token endpoint or discovery failure
    #[error("OAuth error: {0}")]
    OAuth(String),

    /// Bearer token validation failed
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// HTTP status code the surrounding HTTP layer should answer with.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation(e) => e.status_code(),
            Self::InvalidInput(_) => 400,
            Self::OAuth(_) | Self::Http(_) => 502,
            Self::Config(_) | Self::Io(_) | Self::Json(_) => 500,
        }
    }
}
