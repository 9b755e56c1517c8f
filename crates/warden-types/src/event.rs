//! Normalized activity events shared by both ingestion sources.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The closed set of activity kinds.
///
/// Both the remote push bridge and the local log watcher map their input
/// onto this set; neither source may invent kinds of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The operator (or a tracked user) moved to a new instance.
    LocationChanged,
    /// The display name of the current world became known.
    WorldEntered,
    /// A user joined the current instance or a group.
    MemberJoined,
    /// A user left the current instance or a group.
    MemberLeft,
    /// A user switched avatars.
    AvatarChanged,
    /// A user asked to join a group.
    JoinRequest,
    /// A ban was issued in a group.
    Ban,
    /// A member's roles changed.
    RoleChange,
    /// Any other platform notification.
    Notification,
    /// A remote message whose type has no mapping.
    Unclassified,
}

impl EventKind {
    /// All kinds, in declaration order.
    pub const ALL: [EventKind; 10] = [
        Self::LocationChanged,
        Self::WorldEntered,
        Self::MemberJoined,
        Self::MemberLeft,
        Self::AvatarChanged,
        Self::JoinRequest,
        Self::Ban,
        Self::RoleChange,
        Self::Notification,
        Self::Unclassified,
    ];

    /// Returns the canonical string label for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LocationChanged => "location_changed",
            Self::WorldEntered => "world_entered",
            Self::MemberJoined => "member_joined",
            Self::MemberLeft => "member_left",
            Self::AvatarChanged => "avatar_changed",
            Self::JoinRequest => "join_request",
            Self::Ban => "ban",
            Self::RoleChange => "role_change",
            Self::Notification => "notification",
            Self::Unclassified => "unclassified",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventKind {
    type Err = ParseEventKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseEventKindError(s.to_string()))
    }
}

/// Error returned when parsing an unknown event kind string.
#[derive(Debug, Clone)]
pub struct ParseEventKindError(pub String);

impl std::fmt::Display for ParseEventKindError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown event kind: {}", self.0)
    }
}

impl std::error::Error for ParseEventKindError {}

/// Which ingestion source produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceOrigin {
    RemotePush,
    LocalLog,
}

impl SourceOrigin {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RemotePush => "remote_push",
            Self::LocalLog => "local_log",
        }
    }
}

/// A single activity fact, regardless of source.
///
/// Payload keys are camelCase. Well-known keys: `groupId`, `userId`,
/// `displayName`, `worldId`, `instance`, `location`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedEvent {
    pub kind: EventKind,
    pub origin: SourceOrigin,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl NormalizedEvent {
    /// Creates an event stamped with the current time and an empty payload.
    pub fn new(kind: EventKind, origin: SourceOrigin) -> Self {
        Self {
            kind,
            origin,
            timestamp: Utc::now(),
            payload: Map::new(),
        }
    }

    /// Overrides the timestamp.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Adds a payload entry.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    /// Returns a string payload entry, if present.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn group_id(&self) -> Option<&str> {
        self.str_field("groupId")
    }

    pub fn user_id(&self) -> Option<&str> {
        self.str_field("userId")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_labels_round_trip() {
        for kind in EventKind::ALL {
            assert_eq!(kind.as_str().parse::<EventKind>().unwrap(), kind);
        }
        assert!("friend-online".parse::<EventKind>().is_err());
    }

    #[test]
    fn payload_accessors() {
        let event = NormalizedEvent::new(EventKind::JoinRequest, SourceOrigin::RemotePush)
            .with("groupId", "grp_abc")
            .with("userId", "usr_123")
            .with("count", 3);

        assert_eq!(event.group_id(), Some("grp_abc"));
        assert_eq!(event.user_id(), Some("usr_123"));
        assert_eq!(event.str_field("count"), None);
    }
}
