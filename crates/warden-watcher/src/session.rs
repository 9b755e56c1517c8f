//! Reconstructed client session: where the operator is and who is there.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use warden_types::{EventKind, NormalizedEvent, SourceOrigin};

use crate::grammar::{LogEntry, ParsedLine};
use crate::location::LocationKey;

/// One user present in the current instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub display_name: String,
    pub user_id: Option<String>,
    pub joined_at: DateTime<Utc>,
    pub avatar: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub current_world_id: Option<String>,
    /// Composed `world:instance` string.
    pub current_location: Option<String>,
    pub world_name: Option<String>,
    /// Keyed by display name.
    pub roster: BTreeMap<String, PresenceRecord>,
}

impl SessionState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn location_key(&self) -> Option<LocationKey> {
        self.current_location.as_deref().and_then(LocationKey::parse)
    }

    /// Applies one parsed line and returns the event it produces, if any.
    pub fn apply(&mut self, line: ParsedLine) -> Option<NormalizedEvent> {
        let at = line.timestamp;
        match line.entry {
            LogEntry::Location { world, instance } => {
                let key = LocationKey::new(&world, &instance);
                let composed = key.composed();
                if self.current_location.as_deref() == Some(composed.as_str()) {
                    return None;
                }
                tracing::info!(location = %composed, cleared = self.roster.len(), "instance changed");
                self.roster.clear();
                self.world_name = None;
                self.current_world_id = Some(world);
                self.current_location = Some(composed);
                Some(self.location_event(&key, at))
            }
            LogEntry::WorldName { name } => {
                if self.world_name.as_deref() == Some(name.as_str()) {
                    return None;
                }
                self.world_name = Some(name);
                Some(self.world_event(at))
            }
            LogEntry::PlayerJoined { name, user_id } => {
                let record = PresenceRecord {
                    display_name: name.clone(),
                    user_id,
                    joined_at: at,
                    avatar: None,
                };
                let event = self.presence_event(EventKind::MemberJoined, &record, at);
                self.roster.insert(name, record);
                Some(event)
            }
            LogEntry::PlayerLeft { name, user_id } => {
                let record = match self.roster.remove(&name) {
                    Some(mut stored) => {
                        if stored.user_id.is_none() {
                            stored.user_id = user_id;
                        }
                        stored
                    }
                    None => PresenceRecord {
                        display_name: name,
                        user_id,
                        joined_at: at,
                        avatar: None,
                    },
                };
                Some(self.presence_event(EventKind::MemberLeft, &record, at))
            }
            LogEntry::AvatarChanged { name, avatar } => {
                let user_id = self.roster.get_mut(&name).and_then(|record| {
                    record.avatar = Some(avatar.clone());
                    record.user_id.clone()
                });
                let mut event = NormalizedEvent::new(EventKind::AvatarChanged, SourceOrigin::LocalLog)
                    .at(at)
                    .with("displayName", name)
                    .with("avatarName", avatar);
                if let Some(user_id) = user_id {
                    event = event.with("userId", user_id);
                }
                Some(self.with_location(event))
            }
        }
    }

    /// Events describing the current state, for late subscribers.
    pub fn replay(&self) -> Vec<NormalizedEvent> {
        let mut events = Vec::new();
        if let Some(key) = self.location_key() {
            events.push(self.location_event(&key, Utc::now()));
        }
        if self.world_name.is_some() {
            events.push(self.world_event(Utc::now()));
        }
        for record in self.roster.values() {
            events.push(self.presence_event(EventKind::MemberJoined, record, record.joined_at));
        }
        events
    }

    fn location_event(&self, key: &LocationKey, at: DateTime<Utc>) -> NormalizedEvent {
        let mut event = NormalizedEvent::new(EventKind::LocationChanged, SourceOrigin::LocalLog)
            .at(at)
            .with("worldId", key.world_id.as_str())
            .with("instance", key.instance.as_str())
            .with("location", key.composed())
            .with("accessType", key.access_type.as_str());
        if let Some(group_id) = &key.group_id {
            event = event.with("groupId", group_id.as_str());
        }
        if let Some(region) = &key.region {
            event = event.with("region", region.as_str());
        }
        event
    }

    fn world_event(&self, at: DateTime<Utc>) -> NormalizedEvent {
        let event = NormalizedEvent::new(EventKind::WorldEntered, SourceOrigin::LocalLog).at(at);
        let event = match &self.world_name {
            Some(name) => event.with("worldName", name.as_str()),
            None => event,
        };
        self.with_location(event)
    }

    fn presence_event(&self, kind: EventKind, record: &PresenceRecord, at: DateTime<Utc>) -> NormalizedEvent {
        let mut event = NormalizedEvent::new(kind, SourceOrigin::LocalLog)
            .at(at)
            .with("displayName", record.display_name.as_str());
        if let Some(user_id) = &record.user_id {
            event = event.with("userId", user_id.as_str());
        }
        self.with_location(event)
    }

    /// Adds `worldId`, `location` and, for group instances, `groupId`.
    fn with_location(&self, mut event: NormalizedEvent) -> NormalizedEvent {
        if let Some(world_id) = &self.current_world_id {
            event = event.with("worldId", world_id.as_str());
        }
        if let Some(key) = self.location_key() {
            event = event.with("location", key.composed());
            if let Some(group_id) = key.group_id {
                event = event.with("groupId", group_id);
            }
        }
        event
    }
}
