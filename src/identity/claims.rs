//! Claim shapes at the deserialization boundary and their normalization into
//! a [`User`].
//!
//! Providers disagree on how they ship `role` and `device_scope`: a string, an
//! array, sometimes something else entirely. Those shapes are captured here as
//! untagged enums and collapsed into the canonical [`User`] in
//! [`normalize`], the only place that knows about them.
//!
//! Normalization never escalates: an unreadable role becomes `read_only`, and
//! a malformed scope becomes unrestricted with a warning rather than a silent
//! denial (the role/tier check still applies).

use std::collections::HashMap;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::user::{DeviceScope, User, UserRole};
use super::validator::ValidationError;

/// Raw claims of an ID or access token.
#[derive(Debug, Deserialize)]
pub(crate) struct TokenClaims {
    #[serde(default)]
    pub sub: Option<String>,
    /// Expiry as a Unix timestamp. Some providers emit fractional seconds.
    #[serde(default)]
    pub exp: Option<f64>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub role: Option<RoleClaim>,
    #[serde(default)]
    pub device_scope: Option<ScopeClaim>,
    /// Everything else, for provider-namespaced custom claims.
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// `role` as shipped by the provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum RoleClaim {
    Single(String),
    List(Vec<Value>),
    Other(Value),
}

/// `device_scope` as shipped by the provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ScopeClaim {
    /// `"dev-1, dev-2"`
    Csv(String),
    /// `["dev-1", "dev-2"]`; every element must be a string
    List(Vec<Value>),
    Other(Value),
}

/// Build the normalized [`User`] from verified (or, in insecure mode,
/// unverified) claims.
///
/// `role_claim` names an optional provider-namespaced claim consulted when the
/// plain `role` claim is absent.
pub(crate) fn normalize(claims: TokenClaims, role_claim: Option<&str>) -> Result<User, ValidationError> {
    let sub = claims
        .sub
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ValidationError::MissingClaim("sub".to_string()))?;

    let raw_role = claims.role.or_else(|| {
        role_claim
            .and_then(|name| claims.extra.get(name))
            .and_then(|v| serde_json::from_value::<RoleClaim>(v.clone()).ok())
    });
    let role = resolve_role(&sub, raw_role.as_ref());
    let device_scope = resolve_scope(&sub, claims.device_scope.as_ref());

    Ok(User {
        sub,
        email: claims.email.filter(|s| !s.is_empty()),
        display_name: claims
            .name
            .or(claims.preferred_username)
            .filter(|s| !s.is_empty()),
        role,
        device_scope,
    })
}

fn resolve_role(sub: &str, claim: Option<&RoleClaim>) -> UserRole {
    let candidate = match claim {
        None => {
            warn!(sub = %sub, "Token carries no role claim, defaulting to read_only");
            return UserRole::ReadOnly;
        }
        Some(RoleClaim::Single(s)) => Some(s.as_str()),
        Some(RoleClaim::List(items)) => items.first().and_then(Value::as_str),
        Some(RoleClaim::Other(_)) => None,
    };

    match candidate.map(str::parse::<UserRole>) {
        Some(Ok(role)) => role,
        Some(Err(_)) | None => {
            warn!(
                sub = %sub,
                claim = ?candidate,
                "Unrecognized role claim, substituting read_only"
            );
            UserRole::ReadOnly
        }
    }
}

fn resolve_scope(sub: &str, claim: Option<&ScopeClaim>) -> DeviceScope {
    match claim {
        None => DeviceScope::Unrestricted,
        Some(ScopeClaim::Csv(s)) => listed_scope(sub, s.split(',')),
        Some(ScopeClaim::List(items)) => {
            let ids: Option<Vec<&str>> = items.iter().map(Value::as_str).collect();
            if let Some(ids) = ids {
                listed_scope(sub, ids)
            } else {
                warn!(
                    sub = %sub,
                    "device_scope array contains non-string elements, treating as unrestricted"
                );
                DeviceScope::Unrestricted
            }
        }
        Some(ScopeClaim::Other(value)) => {
            if value.is_null() {
                debug!(sub = %sub, "device_scope is null, treating as unrestricted");
            } else {
                warn!(sub = %sub, "device_scope has unsupported shape, treating as unrestricted");
            }
            DeviceScope::Unrestricted
        }
    }
}

/// Scope from an explicit id listing. A listing with no usable ids still
/// widens to unrestricted, which is worth a warning.
fn listed_scope<'a>(sub: &str, ids: impl IntoIterator<Item = &'a str>) -> DeviceScope {
    let scope = DeviceScope::from_ids(ids);
    if scope.is_unrestricted() {
        warn!(sub = %sub, "device_scope lists no device ids, treating as unrestricted");
    }
    scope
}
