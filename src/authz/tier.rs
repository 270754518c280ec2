//! Tool sensitivity tiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::identity::UserRole;

/// Sensitivity class every tool declares, in ascending order.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ToolTier {
    /// Read-only queries
    Fundamental,
    /// Configuration writes
    Advanced,
    /// High-blast-radius operations (multi-device plans, reboots)
    Professional,
}

impl ToolTier {
    /// Canonical lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fundamental => "fundamental",
            Self::Advanced => "advanced",
            Self::Professional => "professional",
        }
    }

    /// Highest tier `role` may invoke; `None` for roles that invoke nothing.
    #[must_use]
    pub fn ceiling_for(role: UserRole) -> Option<Self> {
        match role {
            UserRole::ReadOnly => Some(Self::Fundamental),
            UserRole::OpsRw => Some(Self::Advanced),
            UserRole::Admin => Some(Self::Professional),
            UserRole::Approver => None,
        }
    }
}

impl fmt::Display for ToolTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fundamental" => Ok(Self::Fundamental),
            "advanced" => Ok(Self::Advanced),
            "professional" => Ok(Self::Professional),
            other => Err(format!("unknown tool tier: {other}")),
        }
    }
}
