//! Operator-authored moderation rules.
//!
//! Rules are plain data here; evaluation lives in `warden-rules`.

use crate::record::ModerationAction;
use crate::TrustTier;
use serde::{Deserialize, Serialize};

fn default_enabled() -> bool {
    true
}

/// A moderation condition plus the action to take when it matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleDefinition {
    pub id: String,
    /// The group this rule is scoped to.
    pub group_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Lower values are evaluated first.
    #[serde(default)]
    pub priority: i32,
    pub predicate: RulePredicate,
    pub action: ModerationAction,
    /// Human-readable reason attached to enforcement records.
    #[serde(default)]
    pub reason: Option<String>,
}

/// Which name a pattern is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NameField {
    #[default]
    DisplayName,
    Username,
    /// Either name matching is enough.
    Either,
}

/// Condition evaluated against a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RulePredicate {
    /// Always matches.
    Always,
    /// Subject's trust tier is strictly below `tier`.
    TrustBelow { tier: TrustTier },
    /// Subject's trust tier is at least `tier`.
    TrustAtLeast { tier: TrustTier },
    /// Regular expression over a name field.
    NameMatches {
        pattern: String,
        #[serde(default)]
        field: NameField,
        #[serde(default)]
        case_insensitive: bool,
    },
    /// Account is younger than `days`. Unknown creation dates do not match.
    AccountAgeBelow { days: u32 },
    /// Group membership is shorter than `days`. Non-members always match.
    MembershipShorterThan { days: u32 },
    /// Subject carries `tag`.
    HasTag { tag: String },
    All { predicates: Vec<RulePredicate> },
    Any { predicates: Vec<RulePredicate> },
    Not { predicate: Box<RulePredicate> },
}
