//! Bounded log of denied authorization attempts.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

use crate::error::{DenialReason, GroupAction};

/// Entries beyond this count trigger compaction.
pub const AUDIT_CAPACITY: usize = 1000;

/// Number of most recent entries kept after compaction.
pub const AUDIT_COMPACT_TO: usize = 500;

/// One denied attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionAuditEntry {
    pub timestamp: DateTime<Utc>,
    pub group_id: String,
    pub action: GroupAction,
    pub reason: DenialReason,
}

/// Ring buffer that drops the oldest entries once over capacity.
#[derive(Debug, Default)]
pub(crate) struct AuditLog {
    entries: VecDeque<RejectionAuditEntry>,
}

impl AuditLog {
    pub(crate) fn push(&mut self, entry: RejectionAuditEntry) {
        self.entries.push_back(entry);
        if self.entries.len() > AUDIT_CAPACITY {
            let excess = self.entries.len() - AUDIT_COMPACT_TO;
            self.entries.drain(..excess);
        }
    }

    pub(crate) fn snapshot(&self) -> Vec<RejectionAuditEntry> {
        self.entries.iter().cloned().collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
