//! Wire shapes of the platform API and their conversions.
//!
//! The upstream schema is undocumented; every field the engine does not
//! strictly need is optional.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use warden_types::Subject;

/// Response of the dedicated token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthTokenResponse {
    pub token: String,
}

/// How to answer a pending join request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinDecision {
    Accept,
    Reject,
}

impl JoinDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Reject => "reject",
        }
    }
}

/// A pending request to join a group.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub user_id: String,
    pub display_name: String,
    pub requested_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireGroupMember {
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub user: Option<WireLimitedUser>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireLimitedUser {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
}

impl WireGroupMember {
    /// Converts into a [`JoinRequest`]; entries without any user id are dropped.
    pub(crate) fn into_join_request(self) -> Option<JoinRequest> {
        let user_id = self
            .user_id
            .or_else(|| self.user.as_ref().and_then(|u| u.id.clone()))?;
        let display_name = self
            .user
            .and_then(|u| u.display_name)
            .unwrap_or_else(|| user_id.clone());
        Some(JoinRequest {
            user_id,
            display_name,
            requested_at: self.created_at,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireUser {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// `YYYY-MM-DD`.
    #[serde(default, rename = "date_joined")]
    pub date_joined: Option<String>,
}

impl WireUser {
    pub(crate) fn into_subject(self, member_since: Option<DateTime<Utc>>) -> Subject {
        let account_created = self
            .date_joined
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|dt| dt.and_utc());
        let mut subject = Subject::new(self.id, self.display_name, self.tags);
        subject.username = self.username;
        subject.account_created = account_created;
        subject.member_since = member_since;
        subject
    }
}

/// Entry of `GET /users/{userId}/groups`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireUserGroup {
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
}

impl WireUserGroup {
    pub(crate) fn group_id(&self) -> Option<&str> {
        self.group_id
            .as_deref()
            .or(self.id.as_deref())
            .filter(|id| id.starts_with(warden_types::GROUP_ID_PREFIX))
    }
}

/// Subset of `GET /groups/{groupId}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireGroup {
    pub id: String,
    #[serde(default)]
    pub my_member: Option<WireMyMember>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireMyMember {
    #[serde(default)]
    pub permissions: Vec<String>,
}

/// Permissions that make a group moderatable by the operator.
pub const MODERATION_PERMISSIONS: &[&str] = &[
    "*",
    "group-members-manage",
    "group-bans-manage",
    "group-members-remove",
];

impl WireGroup {
    pub(crate) fn is_moderated(&self) -> bool {
        self.my_member.as_ref().is_some_and(|m| {
            m.permissions
                .iter()
                .any(|p| MODERATION_PERMISSIONS.contains(&p.as_str()))
        })
    }
}
