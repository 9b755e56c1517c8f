//! Authorization gate for group-scoped moderation actions.
//!
//! The gate is the single source of truth for which groups the operator
//! may moderate. The allow-list is replaced wholesale on every permission
//! refresh. Every denial lands in a bounded audit log.

mod audit;
mod error;
mod gate;

pub use audit::{RejectionAuditEntry, AUDIT_CAPACITY, AUDIT_COMPACT_TO};
pub use error::{AuthError, DenialReason, GroupAction};
pub use gate::{AccessDecision, AuthorizationGate};
