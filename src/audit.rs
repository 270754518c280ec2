//! Audit events for authorization decisions.
//!
//! Every decision, allow or deny, is handed to an [`AuditSink`]. The default
//! [`TracingAuditSink`] emits it via `tracing::info!` as a JSON blob in the
//! `audit` field, so any log aggregator can pick it up.
//!
//! # Events
//!
//! | Event | When |
//! |-------|------|
//! | `authz.allow` | A tool invocation was permitted |
//! | `authz.deny` | A tool invocation was refused, or the device could not be resolved |
//! | `authz.approval` | A plan approval/rejection permission check, either outcome |

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::authz::{Decision, Environment, ToolTier};
use crate::identity::{User, UserRole};

/// Structured audit record for one authorization decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// Event type string (e.g. `"authz.deny"`).
    pub event: &'static str,
    /// Unique id for correlating this decision across logs.
    pub decision_id: Uuid,
    /// When the decision was made.
    pub timestamp: DateTime<Utc>,
    /// Subject of the deciding identity.
    pub subject: String,
    /// Role of the deciding identity.
    pub role: UserRole,
    /// Tool requested (or the approval action).
    pub tool_name: String,
    /// Tier of the tool; absent for approvals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_tier: Option<ToolTier>,
    /// Target device.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Device environment, when the device was resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub environment: Option<Environment>,
    /// `"allow"` or `"deny"`.
    pub decision: &'static str,
    /// Machine-readable denial reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human-readable denial message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuditEvent {
    /// Construct an `authz.allow` / `authz.deny` event for a tool decision.
    #[must_use]
    pub fn tool_decision(
        user: &User,
        tool_name: &str,
        tool_tier: ToolTier,
        device_id: &str,
        environment: Option<Environment>,
        decision: &Decision,
    ) -> Self {
        let event = if decision.is_allowed() {
            "authz.allow"
        } else {
            "authz.deny"
        };
        let mut audit = Self::base(event, user, tool_name, decision);
        audit.tool_tier = Some(tool_tier);
        audit.device_id = Some(device_id.to_string());
        audit.environment = environment;
        audit
    }

    /// Construct an `authz.deny` event for a device the registry could not
    /// resolve.
    #[must_use]
    pub fn unresolved_device(
        user: &User,
        tool_name: &str,
        tool_tier: ToolTier,
        device_id: &str,
        reason: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            event: "authz.deny",
            decision_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            subject: user.sub.clone(),
            role: user.role,
            tool_name: tool_name.to_string(),
            tool_tier: Some(tool_tier),
            device_id: Some(device_id.to_string()),
            environment: None,
            decision: "deny",
            reason: Some(reason.to_string()),
            message: Some(message.into()),
        }
    }

    /// Construct an `authz.approval` event.
    #[must_use]
    pub fn approval(user: &User, action: &str, decision: &Decision) -> Self {
        Self::base("authz.approval", user, action, decision)
    }

    fn base(event: &'static str, user: &User, tool_name: &str, decision: &Decision) -> Self {
        let (verdict, reason, message) = match decision {
            Decision::Allow => ("allow", None, None),
            Decision::Deny { reason, message } => (
                "deny",
                Some(reason.as_str().to_string()),
                Some(message.clone()),
            ),
        };
        Self {
            event,
            decision_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            subject: user.sub.clone(),
            role: user.role,
            tool_name: tool_name.to_string(),
            tool_tier: None,
            device_id: None,
            environment: None,
            decision: verdict,
            reason,
            message,
        }
    }
}

/// Receiver of audit events. Implementations must not block for long: the
/// engine calls `record` inline with every decision.
pub trait AuditSink: Send + Sync {
    /// Record one event.
    fn record(&self, event: &AuditEvent);
}

/// Sink that writes events to the `tracing` pipeline.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: &AuditEvent) {
        emit(event);
    }
}

/// Emit an audit event via `tracing::info!` with the event as JSON:
///
/// ```text
/// INFO routeros_mcp_auth::audit audit={"event":"authz.deny",...}
/// ```
pub fn emit(event: &AuditEvent) {
    match serde_json::to_string(event) {
        Ok(ref json) => tracing::info!(audit = %json, "authorization audit"),
        Err(ref e) => tracing::warn!(error = %e, "Failed to serialize audit event"),
    }
}
