//! The authorization gate.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};
use warden_types::GroupId;

use crate::audit::{AuditLog, RejectionAuditEntry};
use crate::error::{AuthError, DenialReason, GroupAction};

/// Result of [`AuthorizationGate::validate_access_safe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDecision {
    pub allowed: bool,
    pub error: Option<AuthError>,
}

#[derive(Debug, Default)]
struct GateState {
    allowed: HashSet<GroupId>,
    audit: AuditLog,
}

/// Owns the set of groups the operator is verified to moderate.
///
/// Constructed once at startup and shared by `Arc`. Nothing else holds a
/// copy of the allow-list; dependents ask the gate.
#[derive(Debug, Default)]
pub struct AuthorizationGate {
    state: Mutex<GateState>,
}

impl AuthorizationGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GateState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                tracing::error!("authorization gate lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Replaces the allow-list with `ids`. Nothing from the previous set
    /// survives. Non-canonical ids are dropped.
    ///
    /// Returns the number of groups now trusted.
    pub fn set_allowed_groups<I, S>(&self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut next = HashSet::new();
        for raw in ids {
            let raw = raw.as_ref();
            match GroupId::parse(raw) {
                Some(id) => {
                    next.insert(id);
                }
                None => tracing::warn!(group_id = raw, "ignoring malformed group id in permission refresh"),
            }
        }

        let count = next.len();
        let previous = std::mem::replace(&mut self.lock().allowed, next);
        tracing::info!(
            previous = previous.len(),
            current = count,
            "moderation allow-list replaced"
        );
        count
    }

    /// Forgets every trusted group (logout).
    pub fn clear(&self) {
        self.lock().allowed.clear();
        tracing::info!("moderation allow-list cleared");
    }

    pub fn is_allowed(&self, group_id: &str) -> bool {
        GroupId::parse(group_id).is_some_and(|id| self.lock().allowed.contains(&id))
    }

    /// Sorted snapshot of the allow-list.
    pub fn allowed_groups(&self) -> Vec<GroupId> {
        let mut groups: Vec<GroupId> = self.lock().allowed.iter().cloned().collect();
        groups.sort();
        groups
    }

    /// Checks that `action` may be performed on `group_id`.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Denied` when the id is empty, not canonical, or
    /// not in the allow-list. Every denial is recorded in the audit log.
    pub fn validate_access(&self, group_id: &str, action: GroupAction) -> Result<GroupId, AuthError> {
        let trimmed = group_id.trim();
        let mut state = self.lock();

        let verdict = if trimmed.is_empty() {
            Err(DenialReason::MissingGroupId)
        } else {
            match GroupId::parse(trimmed) {
                None => Err(DenialReason::MalformedGroupId),
                Some(id) if state.allowed.contains(&id) => Ok(id),
                Some(_) => Err(DenialReason::NotModerated),
            }
        };

        match verdict {
            Ok(id) => {
                tracing::debug!(group_id = %id, action = action.as_str(), "authorization granted");
                Ok(id)
            }
            Err(reason) => {
                state.audit.push(RejectionAuditEntry {
                    timestamp: Utc::now(),
                    group_id: trimmed.to_string(),
                    action,
                    reason,
                });
                tracing::warn!(
                    group_id = trimmed,
                    action = action.as_str(),
                    reason = reason.as_str(),
                    "authorization denied"
                );
                Err(AuthError::Denied {
                    group_id: trimmed.to_string(),
                    action,
                    reason,
                })
            }
        }
    }

    /// Non-failing variant of [`validate_access`](Self::validate_access) for
    /// call sites where a denial is an expected branch.
    pub fn validate_access_safe(&self, group_id: &str, action: GroupAction) -> AccessDecision {
        match self.validate_access(group_id, action) {
            Ok(_) => AccessDecision {
                allowed: true,
                error: None,
            },
            Err(e) => AccessDecision {
                allowed: false,
                error: Some(e),
            },
        }
    }

    /// Keeps only the items whose extracted group id is in the allow-list.
    ///
    /// Items with no extractable id are dropped.
    pub fn filter_authorized_data<T, F>(&self, items: Vec<T>, extract_group_id: F) -> Vec<T>
    where
        F: Fn(&T) -> Option<&str>,
    {
        let state = self.lock();
        let before = items.len();
        let kept: Vec<T> = items
            .into_iter()
            .filter(|item| {
                extract_group_id(item)
                    .and_then(GroupId::parse)
                    .is_some_and(|id| state.allowed.contains(&id))
            })
            .collect();

        if kept.len() != before {
            tracing::debug!(
                removed = before - kept.len(),
                kept = kept.len(),
                "filtered out data from unmoderated groups"
            );
        }
        kept
    }

    /// Snapshot of recorded denials, oldest first.
    pub fn audit_log(&self) -> Vec<RejectionAuditEntry> {
        self.lock().audit.snapshot()
    }

    pub fn audit_len(&self) -> usize {
        self.lock().audit.len()
    }
}
