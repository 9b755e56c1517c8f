//! Authorization denial types.

use serde::{Deserialize, Serialize};

/// Group-scoped capabilities that must pass the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupAction {
    ViewJoinRequests,
    RespondJoinRequest,
    Ban,
    Kick,
    ViewAuditLog,
    EvaluateRules,
    ManageRules,
}

impl GroupAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ViewJoinRequests => "view_join_requests",
            Self::RespondJoinRequest => "respond_join_request",
            Self::Ban => "ban",
            Self::Kick => "kick",
            Self::ViewAuditLog => "view_audit_log",
            Self::EvaluateRules => "evaluate_rules",
            Self::ManageRules => "manage_rules",
        }
    }
}

impl std::fmt::Display for GroupAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why access was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    /// No group id was supplied.
    MissingGroupId,
    /// The id does not match the canonical group-id format.
    MalformedGroupId,
    /// The group is not in the verified allow-list.
    NotModerated,
}

impl DenialReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MissingGroupId => "missing group id",
            Self::MalformedGroupId => "malformed group id",
            Self::NotModerated => "group not in moderation allow-list",
        }
    }
}

impl std::fmt::Display for DenialReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by the authorization gate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The gate refused a group-scoped action.
    #[error("access denied: {action} on '{group_id}': {reason}")]
    Denied {
        group_id: String,
        action: GroupAction,
        reason: DenialReason,
    },
}

impl AuthError {
    pub fn reason(&self) -> DenialReason {
        match self {
            Self::Denied { reason, .. } => *reason,
        }
    }
}
