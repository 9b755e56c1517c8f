//! Decoding and classification of push frames.
//!
//! Frames are JSON objects `{type, content, err?}`. The platform often
//! double-encodes `content` as a JSON string, so string content is parsed a
//! second time and kept verbatim only if that fails.

use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use warden_types::{EventKind, NormalizedEvent, SourceOrigin};

/// SHA-256 of a raw frame, used to drop consecutive duplicates.
pub type Fingerprint = [u8; 32];

pub fn fingerprint(raw: &[u8]) -> Fingerprint {
    Sha256::digest(raw).into()
}

/// One decoded push frame.
#[derive(Debug, Clone, PartialEq)]
pub struct PushMessage {
    pub kind: String,
    pub content: Value,
    pub err: Option<String>,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    content: Value,
    #[serde(default)]
    err: Option<Value>,
}

pub fn decode(raw: &[u8]) -> Result<PushMessage, serde_json::Error> {
    let envelope: Envelope = serde_json::from_slice(raw)?;
    let content = match envelope.content {
        Value::String(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
        other => other,
    };
    let err = envelope.err.and_then(|e| match e {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    });
    Ok(PushMessage {
        kind: envelope.kind,
        content,
        err,
    })
}

/// Maps a remote message type (and, for notifications, the inner type) onto
/// the closed event vocabulary.
pub fn classify(kind: &str, content: &Value) -> EventKind {
    match kind {
        "friend-location" | "user-location" => EventKind::LocationChanged,
        "group-joined" => EventKind::MemberJoined,
        "group-left" => EventKind::MemberLeft,
        "group-member-updated" | "group-role-updated" => EventKind::RoleChange,
        "notification" | "notification-v2" => {
            match content.get("type").and_then(Value::as_str) {
                Some("group.joinRequest") => EventKind::JoinRequest,
                Some("group.ban") | Some("group.banned") => EventKind::Ban,
                _ => EventKind::Notification,
            }
        }
        _ => EventKind::Unclassified,
    }
}

const GROUP_ID_PATHS: &[&[&str]] = &[
    &["groupId"],
    &["data", "groupId"],
    &["details", "groupId"],
    &["member", "groupId"],
    &["group", "id"],
];

const USER_ID_PATHS: &[&[&str]] = &[
    &["userId"],
    &["data", "userId"],
    &["details", "userId"],
    &["member", "userId"],
    &["user", "id"],
    &["senderUserId"],
];

const DISPLAY_NAME_PATHS: &[&[&str]] = &[
    &["displayName"],
    &["user", "displayName"],
    &["data", "displayName"],
    &["senderUsername"],
];

fn lookup<'a>(content: &'a Value, paths: &[&[&str]]) -> Option<&'a str> {
    paths.iter().find_map(|path| {
        path.iter()
            .try_fold(content, |node, key| node.get(*key))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    })
}

/// Group notifications link to their group as `group:grp_...`.
fn group_from_link(content: &Value) -> Option<&str> {
    content
        .get("link")
        .and_then(Value::as_str)
        .and_then(|link| link.strip_prefix("group:"))
}

/// Builds the normalized event for a decoded frame.
///
/// Object content is carried over as the payload, with the well-known keys
/// `groupId`, `userId` and `displayName` lifted from wherever the message
/// type nests them. Notifications also carry their id as `notificationId`.
/// `remoteType` records the original type.
pub fn normalize(message: &PushMessage) -> NormalizedEvent {
    let kind = classify(&message.kind, &message.content);
    let mut payload = match &message.content {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("content".to_string(), other.clone());
            map
        }
    };

    let content = &message.content;
    let group_id = lookup(content, GROUP_ID_PATHS).or_else(|| group_from_link(content));
    let lifted = [
        ("groupId", group_id),
        ("userId", lookup(content, USER_ID_PATHS)),
        ("displayName", lookup(content, DISPLAY_NAME_PATHS)),
    ];
    for (key, value) in lifted {
        if let Some(value) = value {
            payload.insert(key.to_string(), Value::String(value.to_string()));
        }
    }
    if matches!(message.kind.as_str(), "notification" | "notification-v2") {
        if let Some(id) = content.get("id").and_then(Value::as_str).filter(|s| !s.is_empty()) {
            payload.insert("notificationId".to_string(), Value::String(id.to_string()));
        }
    }
    payload.insert("remoteType".to_string(), Value::String(message.kind.clone()));

    let mut event = NormalizedEvent::new(kind, SourceOrigin::RemotePush);
    event.payload = payload;
    event
}
