//! The authorization decision engine.
//!
//! # Evaluation order
//!
//! Checks run in a fixed order and the first failure decides the denial:
//!
//! 1. **Role / tier**: `approver` invokes nothing; otherwise the tier must not
//!    exceed the role's ceiling.
//! 2. **Device scope**: a restricted user may only target listed devices.
//! 3. **Environment**: the device must live in the service's own environment.
//! 4. **Capability**: advanced and professional tools need the matching
//!    per-device flag.
//!
//! Every decision is handed to the configured [`AuditSink`] before it is
//! returned.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tracing::debug;

use super::device::{Device, DeviceRegistry, Environment, RegistryError};
use super::tier::ToolTier;
use crate::audit::{AuditEvent, AuditSink, TracingAuditSink};
use crate::identity::{User, UserRole};

/// Per-device capability switch consulted for write tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityFlag {
    /// Gates advanced-tier tools
    AllowAdvancedWrites,
    /// Gates professional-tier tools
    AllowProfessionalWorkflows,
}

impl CapabilityFlag {
    /// Field name on the device record.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AllowAdvancedWrites => "allow_advanced_writes",
            Self::AllowProfessionalWorkflows => "allow_professional_workflows",
        }
    }
}

impl fmt::Display for CapabilityFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a request was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum DenyReason {
    /// Role does not reach the tool's tier (or is `approver`)
    RoleInsufficient,
    /// Device is outside the user's scope
    DeviceScope,
    /// Device environment differs from the service's
    EnvironmentMismatch,
    /// Device does not enable the capability the tier needs
    CapabilityDenied {
        /// The missing flag
        flag: CapabilityFlag,
    },
}

impl DenyReason {
    /// Machine-readable reason code.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RoleInsufficient => "role_insufficient",
            Self::DeviceScope => "device_scope",
            Self::EnvironmentMismatch => "environment_mismatch",
            Self::CapabilityDenied { .. } => "capability_denied",
        }
    }
}

/// Outcome of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "decision")]
pub enum Decision {
    /// Proceed
    Allow,
    /// Refuse, with a typed reason and a human-readable message
    Deny {
        /// Which check failed
        reason: DenyReason,
        /// Message for operators and audit logs
        message: String,
    },
}

impl Decision {
    /// Build a denial.
    pub fn deny(reason: DenyReason, message: impl Into<String>) -> Self {
        Self::Deny {
            reason,
            message: message.into(),
        }
    }

    /// Returns `true` for [`Decision::Allow`].
    #[must_use]
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    /// Denial reason, if denied.
    #[must_use]
    pub fn reason(&self) -> Option<DenyReason> {
        match self {
            Self::Allow => None,
            Self::Deny { reason, .. } => Some(*reason),
        }
    }

    /// Denial message, if denied.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        match self {
            Self::Allow => None,
            Self::Deny { message, .. } => Some(message),
        }
    }

    /// HTTP status: 200 when allowed, 403 for every denial.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        if self.is_allowed() { 200 } else { 403 }
    }
}

/// Action name recorded for approval checks.
const APPROVAL_ACTION: &str = "plan.approve_or_reject";

/// Authorization engine bound to the service's operating environment.
pub struct AuthorizationEngine {
    environment: Environment,
    audit: Arc<dyn AuditSink>,
}

impl AuthorizationEngine {
    /// Engine auditing through `tracing`.
    #[must_use]
    pub fn new(environment: Environment) -> Self {
        Self::with_audit_sink(environment, Arc::new(TracingAuditSink))
    }

    /// Engine auditing through a caller-supplied sink.
    #[must_use]
    pub fn with_audit_sink(environment: Environment, audit: Arc<dyn AuditSink>) -> Self {
        Self { environment, audit }
    }

    /// Environment this service operates in.
    #[must_use]
    pub fn environment(&self) -> Environment {
        self.environment
    }

    /// Decide whether `user` may invoke `tool_name` (of `tier`) on `device`.
    pub fn authorize(&self, user: &User, tool_name: &str, tier: ToolTier, device: &Device) -> Decision {
        let decision = self.evaluate(user, tool_name, tier, device);

        debug!(
            sub = %user.sub,
            role = %user.role,
            tool = tool_name,
            tier = %tier,
            device_id = %device.id,
            allowed = decision.is_allowed(),
            "Authorization decision"
        );
        self.audit.record(&AuditEvent::tool_decision(
            user,
            tool_name,
            tier,
            &device.id,
            Some(device.environment),
            &decision,
        ));
        decision
    }

    /// Resolve `device_id` through `registry`, then [`authorize`](Self::authorize).
    ///
    /// A lookup failure is audited as a denial (without an environment) and
    /// returned as the registry error.
    pub async fn authorize_device_id(
        &self,
        registry: &dyn DeviceRegistry,
        user: &User,
        tool_name: &str,
        tier: ToolTier,
        device_id: &str,
    ) -> Result<Decision, RegistryError> {
        match registry.get(device_id).await {
            Ok(device) => Ok(self.authorize(user, tool_name, tier, &device)),
            Err(err) => {
                self.audit.record(&AuditEvent::unresolved_device(
                    user,
                    tool_name,
                    tier,
                    device_id,
                    err.reason_code(),
                    err.to_string(),
                ));
                Err(err)
            }
        }
    }

    /// Authorize one tool against many devices.
    ///
    /// Each device is resolved and checked independently and concurrently.
    /// The result maps every requested id to `None` (allowed) or the denial
    /// or lookup-failure message.
    pub async fn authorize_batch<S: AsRef<str>>(
        &self,
        registry: &dyn DeviceRegistry,
        user: &User,
        tool_name: &str,
        tier: ToolTier,
        device_ids: &[S],
    ) -> BTreeMap<String, Option<String>> {
        let checks = device_ids.iter().map(|id| async move {
            let id = id.as_ref();
            let outcome = match self.authorize_device_id(registry, user, tool_name, tier, id).await {
                Ok(decision) => decision.message().map(str::to_string),
                Err(err) => Some(err.to_string()),
            };
            (id.to_string(), outcome)
        });

        join_all(checks).await.into_iter().collect()
    }

    /// Decide whether `user` may approve or reject pending plans.
    ///
    /// `approver` and `admin` may; every other role is denied.
    pub fn authorize_approval(&self, user: &User) -> Decision {
        let decision = match user.role {
            UserRole::Approver | UserRole::Admin => Decision::Allow,
            role => Decision::deny(
                DenyReason::RoleInsufficient,
                format!("Role '{role}' cannot approve or reject plans"),
            ),
        };
        self.audit
            .record(&AuditEvent::approval(user, APPROVAL_ACTION, &decision));
        decision
    }

    fn evaluate(&self, user: &User, tool_name: &str, tier: ToolTier, device: &Device) -> Decision {
        // 1. Role / tier
        match ToolTier::ceiling_for(user.role) {
            None => {
                return Decision::deny(
                    DenyReason::RoleInsufficient,
                    format!(
                        "Role '{}' may only approve or reject pending plans and cannot invoke tool '{tool_name}'",
                        user.role
                    ),
                );
            }
            Some(ceiling) if tier > ceiling => {
                return Decision::deny(
                    DenyReason::RoleInsufficient,
                    format!(
                        "Role '{}' cannot invoke {tier} tool '{tool_name}' (maximum tier: {ceiling})",
                        user.role
                    ),
                );
            }
            Some(_) => {}
        }

        // 2. Device scope
        if !user.device_scope.permits(&device.id) {
            return Decision::deny(
                DenyReason::DeviceScope,
                format!("device '{}' not in allowed scope", device.id),
            );
        }

        // 3. Environment
        if device.environment != self.environment {
            return Decision::deny(
                DenyReason::EnvironmentMismatch,
                format!(
                    "Device '{}' is in environment '{}' but this service operates in '{}'",
                    device.id, device.environment, self.environment
                ),
            );
        }

        // 4. Capability
        let required = match tier {
            ToolTier::Fundamental => None,
            ToolTier::Advanced => {
                Some((CapabilityFlag::AllowAdvancedWrites, device.allow_advanced_writes))
            }
            ToolTier::Professional => Some((
                CapabilityFlag::AllowProfessionalWorkflows,
                device.allow_professional_workflows,
            )),
        };
        if let Some((flag, false)) = required {
            return Decision::deny(
                DenyReason::CapabilityDenied { flag },
                format!(
                    "Device '{}' does not permit {tier} tools: {flag} is disabled",
                    device.id
                ),
            );
        }

        Decision::Allow
    }
}
