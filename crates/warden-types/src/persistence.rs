//! Contract for the persistence collaborator.
//!
//! The engine writes records and events through this trait and never reads
//! its history back. Implementations are synchronous; async callers should
//! run them on a blocking thread.

use crate::event::NormalizedEvent;
use crate::record::EnforcementRecord;
use crate::rule::RuleDefinition;

/// Errors surfaced by a persistence backend.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("persistence backend error: {0}")]
    Backend(String),

    #[error("persistence serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub trait Persistence: Send + Sync {
    fn record_enforcement(&self, record: &EnforcementRecord) -> Result<(), PersistError>;

    fn record_event(&self, event: &NormalizedEvent) -> Result<(), PersistError>;

    /// Inserts or replaces a rule. Replacing keeps its definition order.
    fn save_rule(&self, rule: &RuleDefinition) -> Result<(), PersistError>;

    fn delete_rule(&self, rule_id: &str) -> Result<(), PersistError>;

    /// Returns all rules in definition order.
    fn load_rules(&self) -> Result<Vec<RuleDefinition>, PersistError>;
}

/// Discards everything. Used when no database is configured and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPersistence;

impl Persistence for NoopPersistence {
    fn record_enforcement(&self, _record: &EnforcementRecord) -> Result<(), PersistError> {
        Ok(())
    }

    fn record_event(&self, _event: &NormalizedEvent) -> Result<(), PersistError> {
        Ok(())
    }

    fn save_rule(&self, _rule: &RuleDefinition) -> Result<(), PersistError> {
        Ok(())
    }

    fn delete_rule(&self, _rule_id: &str) -> Result<(), PersistError> {
        Ok(())
    }

    fn load_rules(&self) -> Result<Vec<RuleDefinition>, PersistError> {
        Ok(Vec::new())
    }
}
