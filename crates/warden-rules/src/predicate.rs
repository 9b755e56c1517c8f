//! Rule compilation and matching.

use chrono::{DateTime, Duration, Utc};
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use warden_types::{
    is_canonical_group_id, ModerationAction, NameField, RuleDefinition, RulePredicate, Subject,
    TrustTier,
};

use crate::error::EngineError;

/// Compiled patterns are capped so one operator rule cannot blow up memory.
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

#[derive(Debug)]
enum Matcher {
    Always,
    TrustBelow(TrustTier),
    TrustAtLeast(TrustTier),
    Name { regex: Regex, field: NameField },
    AccountAgeBelow(Duration),
    MembershipShorterThan(Duration),
    HasTag(String),
    All(Vec<Matcher>),
    Any(Vec<Matcher>),
    Not(Box<Matcher>),
}

impl Matcher {
    fn compile(predicate: &RulePredicate, rule_id: &str) -> Result<Self, EngineError> {
        Ok(match predicate {
            RulePredicate::Always => Self::Always,
            RulePredicate::TrustBelow { tier } => Self::TrustBelow(*tier),
            RulePredicate::TrustAtLeast { tier } => Self::TrustAtLeast(*tier),
            RulePredicate::NameMatches {
                pattern,
                field,
                case_insensitive,
            } => {
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(*case_insensitive)
                    .size_limit(PATTERN_SIZE_LIMIT)
                    .build()
                    .map_err(|source| EngineError::InvalidPattern {
                        rule_id: rule_id.to_string(),
                        source,
                    })?;
                Self::Name {
                    regex,
                    field: *field,
                }
            }
            RulePredicate::AccountAgeBelow { days } => {
                Self::AccountAgeBelow(Duration::days(i64::from(*days)))
            }
            RulePredicate::MembershipShorterThan { days } => {
                Self::MembershipShorterThan(Duration::days(i64::from(*days)))
            }
            RulePredicate::HasTag { tag } => Self::HasTag(tag.clone()),
            RulePredicate::All { predicates } => Self::All(
                predicates
                    .iter()
                    .map(|p| Self::compile(p, rule_id))
                    .collect::<Result<_, _>>()?,
            ),
            RulePredicate::Any { predicates } => Self::Any(
                predicates
                    .iter()
                    .map(|p| Self::compile(p, rule_id))
                    .collect::<Result<_, _>>()?,
            ),
            RulePredicate::Not { predicate } => {
                Self::Not(Box::new(Self::compile(predicate, rule_id)?))
            }
        })
    }

    fn matches(&self, subject: &Subject, now: DateTime<Utc>) -> bool {
        match self {
            Self::Always => true,
            Self::TrustBelow(tier) => subject.trust_tier < *tier,
            Self::TrustAtLeast(tier) => subject.trust_tier >= *tier,
            Self::Name { regex, field } => {
                let display = || regex.is_match(&subject.display_name);
                let username = || {
                    subject
                        .username
                        .as_deref()
                        .is_some_and(|name| regex.is_match(name))
                };
                match field {
                    NameField::DisplayName => display(),
                    NameField::Username => username(),
                    NameField::Either => display() || username(),
                }
            }
            Self::AccountAgeBelow(limit) => subject
                .account_created
                .is_some_and(|created| now - created < *limit),
            Self::MembershipShorterThan(limit) => match subject.member_since {
                Some(since) => now - since < *limit,
                None => true,
            },
            Self::HasTag(tag) => subject.tags.iter().any(|t| t == tag),
            Self::All(matchers) => matchers.iter().all(|m| m.matches(subject, now)),
            Self::Any(matchers) => matchers.iter().any(|m| m.matches(subject, now)),
            Self::Not(inner) => !inner.matches(subject, now),
        }
    }
}

/// A validated rule with its patterns compiled.
#[derive(Debug)]
pub(crate) struct CompiledRule {
    pub definition: RuleDefinition,
    matcher: Matcher,
}

impl CompiledRule {
    pub fn compile(definition: RuleDefinition) -> Result<Self, EngineError> {
        let invalid = |reason: &str| EngineError::InvalidRule {
            rule_id: definition.id.clone(),
            reason: reason.to_string(),
        };
        if definition.id.trim().is_empty() {
            return Err(invalid("rule id is empty"));
        }
        if !is_canonical_group_id(&definition.group_id) {
            return Err(invalid("group id is not canonical"));
        }
        let matcher = Matcher::compile(&definition.predicate, &definition.id)?;
        Ok(Self {
            definition,
            matcher,
        })
    }

    pub fn matches(&self, subject: &Subject, now: DateTime<Utc>) -> bool {
        self.matcher.matches(subject, now)
    }
}

/// The rule that decided a subject's fate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMatch {
    pub rule_id: String,
    pub rule_name: String,
    pub action: ModerationAction,
    pub reason: String,
}

impl RuleMatch {
    fn from_rule(rule: &RuleDefinition) -> Self {
        let label = if rule.name.is_empty() {
            rule.id.as_str()
        } else {
            rule.name.as_str()
        };
        Self {
            rule_id: rule.id.clone(),
            rule_name: rule.name.clone(),
            action: rule.action,
            reason: rule
                .reason
                .clone()
                .unwrap_or_else(|| format!("matched rule '{label}'")),
        }
    }
}

/// Picks the deciding rule for `subject` in `group_id`.
///
/// Enabled rules of the group are tried by ascending priority, ties broken
/// by definition order. The first matching terminal rule wins; otherwise the
/// first matching flag rule, if any.
pub(crate) fn evaluate<'a, I>(rules: I, group_id: &str, subject: &Subject, now: DateTime<Utc>) -> Option<RuleMatch>
where
    I: IntoIterator<Item = &'a CompiledRule>,
{
    let mut candidates: Vec<&CompiledRule> = rules
        .into_iter()
        .filter(|r| r.definition.enabled && r.definition.group_id == group_id)
        .collect();
    candidates.sort_by_key(|r| r.definition.priority);

    let mut flagged = None;
    for rule in candidates {
        if !rule.matches(subject, now) {
            continue;
        }
        if rule.definition.action.is_terminal() {
            return Some(RuleMatch::from_rule(&rule.definition));
        }
        if flagged.is_none() {
            flagged = Some(RuleMatch::from_rule(&rule.definition));
        }
    }
    flagged
}
