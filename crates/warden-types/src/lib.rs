//! Shared types for the Warden moderation engine.
//!
//! This crate provides the vocabulary every other Warden crate speaks:
//! normalized activity events and the bus that fans them out, canonical
//! group identifiers, trust tiers, moderation subjects and rules, the
//! enforcement record, and the persistence collaborator contract.
//!
//! No crate in the workspace depends on anything *except* `warden-types` for
//! cross-cutting type definitions. This keeps the dependency graph clean and
//! prevents circular dependencies.

mod bus;
mod event;
mod persistence;
mod record;
mod rule;

pub use bus::{EventBus, KindFilter, Subscription};
pub use event::{EventKind, NormalizedEvent, ParseEventKindError, SourceOrigin};
pub use persistence::{NoopPersistence, PersistError, Persistence};
pub use record::{EnforcementRecord, ModerationAction, Trigger};
pub use rule::{NameField, RuleDefinition, RulePredicate};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix every canonical group identifier starts with.
pub const GROUP_ID_PREFIX: &str = "grp_";

/// Longest opaque suffix accepted after [`GROUP_ID_PREFIX`].
pub const GROUP_ID_MAX_SUFFIX: usize = 64;

/// Returns `true` if `id` matches the platform's canonical group-id format:
/// `grp_` followed by 1..=64 characters from `[A-Za-z0-9-]`.
pub fn is_canonical_group_id(id: &str) -> bool {
    match id.strip_prefix(GROUP_ID_PREFIX) {
        Some(suffix) => {
            !suffix.is_empty()
                && suffix.len() <= GROUP_ID_MAX_SUFFIX
                && suffix
                    .bytes()
                    .all(|b| b.is_ascii_alphanumeric() || b == b'-')
        }
        None => false,
    }
}

/// A group identifier that has passed the canonical-format check.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GroupId(String);

impl GroupId {
    /// Parses a raw identifier, returning `None` when it is not canonical.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if is_canonical_group_id(trimmed) {
            Some(Self(trimmed.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for GroupId {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value).ok_or_else(|| format!("not a canonical group id: {value}"))
    }
}

impl From<GroupId> for String {
    fn from(id: GroupId) -> Self {
        id.0
    }
}

impl AsRef<str> for GroupId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Platform trust tiers, ordered from least to most trusted.
///
/// The platform does not expose the tier directly; it is derived from the
/// `system_trust_*` tags on a user profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrustTier {
    Visitor,
    New,
    User,
    Known,
    Trusted,
}

impl TrustTier {
    /// Derives the tier from a user's tag list. The highest tier tag wins.
    pub fn from_tags<S: AsRef<str>>(tags: &[S]) -> Self {
        let mut tier = Self::Visitor;
        for tag in tags {
            let candidate = match tag.as_ref() {
                "system_trust_basic" => Self::New,
                "system_trust_known" => Self::User,
                "system_trust_trusted" => Self::Known,
                "system_trust_veteran" => Self::Trusted,
                _ => continue,
            };
            tier = tier.max(candidate);
        }
        tier
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Visitor => "visitor",
            Self::New => "new",
            Self::User => "user",
            Self::Known => "known",
            Self::Trusted => "trusted",
        }
    }
}

impl std::fmt::Display for TrustTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A platform user under evaluation by the rule engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subject {
    /// Stable platform user id (`usr_...`).
    pub user_id: String,
    pub display_name: String,
    /// Account login name, when the platform exposes it.
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub trust_tier: TrustTier,
    /// When the account was created.
    #[serde(default)]
    pub account_created: Option<DateTime<Utc>>,
    /// When the user joined the group under evaluation, if a member.
    #[serde(default)]
    pub member_since: Option<DateTime<Utc>>,
}

impl Subject {
    /// Builds a subject from its identity and tag list; the trust tier is
    /// derived from the tags.
    pub fn new(
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        tags: Vec<String>,
    ) -> Self {
        let trust_tier = TrustTier::from_tags(&tags);
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            username: None,
            tags,
            trust_tier,
            account_created: None,
            member_since: None,
        }
    }
}
