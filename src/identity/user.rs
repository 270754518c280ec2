//! Normalized identity produced by token validation.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Closed role enumeration.
///
/// `ReadOnly < OpsRw < Admin` by execution privilege. `Approver` sits outside
/// that order: it may approve or reject pending plans but never invoke a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    /// Fundamental-tier tools only
    #[default]
    ReadOnly,
    /// Fundamental and advanced tiers
    OpsRw,
    /// Every tier
    Admin,
    /// Plan approval only
    Approver,
}

impl UserRole {
    /// Canonical claim value.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ReadOnly => "read_only",
            Self::OpsRw => "ops_rw",
            Self::Admin => "admin",
            Self::Approver => "approver",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserRole {
    type Err = String;

    /// Exact, case-sensitive match on the four canonical values.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read_only" => Ok(Self::ReadOnly),
            "ops_rw" => Ok(Self::OpsRw),
            "admin" => Ok(Self::Admin),
            "approver" => Ok(Self::Approver),
            other => Err(format!("unrecognized role: {other}")),
        }
    }
}

/// Which devices a user may target.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceScope {
    /// No restriction
    #[default]
    Unrestricted,
    /// Only these device ids (never empty)
    Devices(BTreeSet<String>),
}

impl DeviceScope {
    /// Build a scope from device ids. Blank ids are dropped and an empty
    /// result collapses to [`DeviceScope::Unrestricted`].
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let set: BTreeSet<String> = ids
            .into_iter()
            .map(|s| s.as_ref().trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if set.is_empty() {
            Self::Unrestricted
        } else {
            Self::Devices(set)
        }
    }

    /// Returns `true` if `device_id` is inside the scope.
    #[must_use]
    pub fn permits(&self, device_id: &str) -> bool {
        match self {
            Self::Unrestricted => true,
            Self::Devices(ids) => ids.contains(device_id),
        }
    }

    /// Returns `true` for [`DeviceScope::Unrestricted`].
    #[must_use]
    pub fn is_unrestricted(&self) -> bool {
        matches!(self, Self::Unrestricted)
    }
}

/// A validated user. Rebuilt from the token cache or the token on every call,
/// never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// OIDC `sub` claim; never empty
    pub sub: String,
    /// Email address, when the provider sends one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Human-readable name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Effective role (least privilege when the claim is absent or unknown)
    pub role: UserRole,
    /// Device restriction
    pub device_scope: DeviceScope,
}

impl User {
    /// A user with no optional attributes and an unrestricted scope.
    #[must_use]
    pub fn new(sub: impl Into<String>, role: UserRole) -> Self {
        Self {
            sub: sub.into(),
            email: None,
            display_name: None,
            role,
            device_scope: DeviceScope::Unrestricted,
        }
    }

    /// Builder: restrict the user to `ids`.
    #[must_use]
    pub fn with_device_scope<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.device_scope = DeviceScope::from_ids(ids);
        self
    }
}
