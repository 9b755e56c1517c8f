//! Enforcement outcomes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What a rule does when it matches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModerationAction {
    /// Accept the subject (accepts a pending join request).
    Allow,
    /// Record the subject for operator review; evaluation continues.
    Flag,
    /// Reject a pending join request.
    Reject,
    /// Ban the subject from the group.
    Ban,
    /// Remove a member from the group. Against a pending join request this
    /// rejects the request.
    Kick,
}

impl ModerationAction {
    /// Terminal actions end rule evaluation.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Flag)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Flag => "flag",
            Self::Reject => "reject",
            Self::Ban => "ban",
            Self::Kick => "kick",
        }
    }
}

impl std::fmt::Display for ModerationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused an evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// A join-request notification from the push connection.
    JoinRequest,
    /// A user appeared in a group-owned instance (local log).
    InstanceJoin,
    /// A pending request found by a batch sweep.
    PendingSweep,
    /// An operator asked for one user to be processed.
    Manual,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::JoinRequest => "join_request",
            Self::InstanceJoin => "instance_join",
            Self::PendingSweep => "pending_sweep",
            Self::Manual => "manual",
        }
    }
}

/// Outcome of one rule evaluation for one subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnforcementRecord {
    pub id: Uuid,
    pub group_id: String,
    pub subject_id: String,
    pub subject_name: String,
    pub rule_id: String,
    pub action: ModerationAction,
    pub trigger: Trigger,
    pub reason: String,
    /// Whether the remote side effect (if any) succeeded.
    pub executed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}
