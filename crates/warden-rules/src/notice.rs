use serde::Serialize;
use warden_types::EnforcementRecord;

/// Broadcast to the presentation layer whenever the engine acts.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModerationNotice {
    Enforced { record: EnforcementRecord },
    /// Terminal actions are paused until the cooldown ends.
    CooldownStarted { retry_after_secs: u64 },
    PermissionsRefreshed { groups: usize },
}

/// Outcome counts of one pending-request sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepSummary {
    /// Groups whose pending list was fetched.
    pub groups: usize,
    pub pending: usize,
    /// Requests that produced an enforcement record.
    pub enforced: usize,
    /// Duplicates and requests no rule matched.
    pub skipped: usize,
    /// Requests left for a later sweep because of a cooldown.
    pub deferred: usize,
    pub failed: usize,
}

/// Point-in-time view of engine state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub rules: usize,
    pub history: usize,
    pub in_flight: usize,
    pub settled: usize,
    pub cooldown_remaining_secs: Option<u64>,
}
