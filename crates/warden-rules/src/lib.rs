//! Rule evaluation and enforcement for moderated groups.
//!
//! [`ModerationEngine`] turns join requests and group-instance joins into
//! enforcement actions. For each subject it picks the deciding rule
//! (ascending priority, then definition order; the first terminal match wins,
//! a flag is used only when nothing terminal matches), enforces it through a
//! typed/generic/raw fallback chain, and writes one [`EnforcementRecord`]
//! to memory, persistence and the notice channel.
//!
//! Duplicate triggers for the same group and user are collapsed by an
//! in-flight set plus a short-lived settled set, so the periodic sweep and
//! per-event processing can overlap safely. A platform rate limit pauses
//! terminal actions for a cooldown.
//!
//! [`EnforcementRecord`]: warden_types::EnforcementRecord

mod config;
mod engine;
mod error;
mod notice;
mod predicate;

pub use config::EngineConfig;
pub use engine::ModerationEngine;
pub use error::EngineError;
pub use notice::{EngineStatus, ModerationNotice, SweepSummary};
pub use predicate::RuleMatch;
