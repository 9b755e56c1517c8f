//! SQLite implementation of the persistence contract.

use chrono::{DateTime, SecondsFormat, Utc};
use r2d2::PooledConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;
use warden_types::{
    EnforcementRecord, EventKind, ModerationAction, NormalizedEvent, PersistError, Persistence,
    RuleDefinition, Trigger,
};

use crate::error::StoreError;
use crate::migrations::run_migrations;
use crate::pool::{create_pool, DbPool, DbRuntimeSettings};

/// Persists enforcement records, raw activity events and rule definitions.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

/// A stored activity event.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    pub id: i64,
    pub kind: String,
    pub origin: String,
    pub group_id: Option<String>,
    pub user_id: Option<String>,
    pub payload_json: String,
    pub occurred_at: String,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Opens (creating if needed) the database at `path` and applies pending
    /// migrations.
    pub fn open(path: &str, settings: DbRuntimeSettings) -> Result<Self, StoreError> {
        let pool = create_pool(path, settings)?;
        {
            let conn = pool.get()?;
            let applied = run_migrations(&conn)?;
            if applied > 0 {
                tracing::info!(applied, path, "database migrations applied");
            }
        }
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    fn conn(&self) -> Result<PooledConnection<SqliteConnectionManager>, StoreError> {
        Ok(self.pool.get()?)
    }

    pub fn insert_enforcement(&self, record: &EnforcementRecord) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO enforcement_records
                (id, group_id, subject_id, subject_name, rule_id, action, trigger_kind,
                 reason, executed, error, occurred_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.id.to_string(),
                record.group_id,
                record.subject_id,
                record.subject_name,
                record.rule_id,
                record.action.as_str(),
                record.trigger.as_str(),
                record.reason,
                record.executed,
                record.error,
                record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            ],
        )?;
        Ok(())
    }

    /// Most recent records first, optionally restricted to one group.
    pub fn recent_enforcements(
        &self,
        group_id: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EnforcementRecord>, StoreError> {
        let conn = self.conn()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(
            "SELECT id, group_id, subject_id, subject_name, rule_id, action, trigger_kind,
                    reason, executed, error, occurred_at
             FROM enforcement_records
             WHERE ?1 IS NULL OR group_id = ?1
             ORDER BY rowid DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![group_id, limit], EnforcementRow::read)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?.decode()?);
        }
        Ok(records)
    }

    pub fn insert_event(&self, event: &NormalizedEvent) -> Result<i64, StoreError> {
        let payload_json = serde_json::to_string(&event.payload)?;
        let id = self.conn()?.query_row(
            "INSERT INTO activity_events (kind, origin, group_id, user_id, payload_json, occurred_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             RETURNING id",
            params![
                event.kind.as_str(),
                event.origin.as_str(),
                event.group_id(),
                event.user_id(),
                payload_json,
                event.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true),
            ],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Most recent events first, optionally restricted to one kind.
    pub fn recent_events(
        &self,
        kind: Option<EventKind>,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        let conn = self.conn()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut stmt = conn.prepare(
            "SELECT id, kind, origin, group_id, user_id, payload_json, occurred_at
             FROM activity_events
             WHERE ?1 IS NULL OR kind = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![kind.map(EventKind::as_str), limit], |row| {
            Ok(StoredEvent {
                id: row.get(0)?,
                kind: row.get(1)?,
                origin: row.get(2)?,
                group_id: row.get(3)?,
                user_id: row.get(4)?,
                payload_json: row.get(5)?,
                occurred_at: row.get(6)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Inserts or replaces a rule. A replaced rule keeps its position.
    pub fn upsert_rule(&self, rule: &RuleDefinition) -> Result<(), StoreError> {
        let definition = serde_json::to_string(rule)?;
        self.conn()?.execute(
            "INSERT INTO moderation_rules (id, position, group_id, definition_json)
             VALUES (?1, (SELECT COALESCE(MAX(position), 0) + 1 FROM moderation_rules), ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                group_id = excluded.group_id,
                definition_json = excluded.definition_json,
                updated_at = datetime('now')",
            params![rule.id, rule.group_id, definition],
        )?;
        Ok(())
    }

    /// Returns whether a rule was removed.
    pub fn remove_rule(&self, rule_id: &str) -> Result<bool, StoreError> {
        let removed = self
            .conn()?
            .execute("DELETE FROM moderation_rules WHERE id = ?1", [rule_id])?;
        Ok(removed > 0)
    }

    pub fn rules(&self) -> Result<Vec<RuleDefinition>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, definition_json FROM moderation_rules ORDER BY position ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut rules = Vec::new();
        for row in rows {
            let (id, json) = row?;
            match serde_json::from_str::<RuleDefinition>(&json) {
                Ok(rule) => rules.push(rule),
                Err(e) => tracing::warn!(rule_id = %id, error = %e, "skipping undecodable rule"),
            }
        }
        Ok(rules)
    }

    pub fn rule(&self, rule_id: &str) -> Result<Option<RuleDefinition>, StoreError> {
        let json: Option<String> = self
            .conn()?
            .query_row(
                "SELECT definition_json FROM moderation_rules WHERE id = ?1",
                [rule_id],
                |row| row.get(0),
            )
            .optional()?;
        json.map(|j| serde_json::from_str(&j).map_err(StoreError::from))
            .transpose()
    }
}

/// Columns of one `enforcement_records` row before domain decoding.
struct EnforcementRow {
    id: String,
    group_id: String,
    subject_id: String,
    subject_name: String,
    rule_id: String,
    action: String,
    trigger: String,
    reason: String,
    executed: bool,
    error: Option<String>,
    occurred_at: String,
}

impl EnforcementRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            group_id: row.get(1)?,
            subject_id: row.get(2)?,
            subject_name: row.get(3)?,
            rule_id: row.get(4)?,
            action: row.get(5)?,
            trigger: row.get(6)?,
            reason: row.get(7)?,
            executed: row.get(8)?,
            error: row.get(9)?,
            occurred_at: row.get(10)?,
        })
    }

    fn decode(self) -> Result<EnforcementRecord, StoreError> {
        let corrupt = |detail: String| StoreError::Corrupt {
            table: "enforcement_records",
            detail,
        };
        let id = Uuid::parse_str(&self.id).map_err(|e| corrupt(format!("id {}: {e}", self.id)))?;
        let action = parse_label::<ModerationAction>(&self.action)
            .map_err(|e| corrupt(format!("action {}: {e}", self.action)))?;
        let trigger = parse_label::<Trigger>(&self.trigger)
            .map_err(|e| corrupt(format!("trigger {}: {e}", self.trigger)))?;
        let timestamp = DateTime::parse_from_rfc3339(&self.occurred_at)
            .map_err(|e| corrupt(format!("timestamp {}: {e}", self.occurred_at)))?
            .with_timezone(&Utc);

        Ok(EnforcementRecord {
            id,
            group_id: self.group_id,
            subject_id: self.subject_id,
            subject_name: self.subject_name,
            rule_id: self.rule_id,
            action,
            trigger,
            reason: self.reason,
            executed: self.executed,
            error: self.error,
            timestamp,
        })
    }
}

/// Decodes a snake_case enum label through its serde representation.
fn parse_label<T: serde::de::DeserializeOwned>(label: &str) -> Result<T, serde_json::Error> {
    serde_json::from_value(serde_json::Value::String(label.to_string()))
}

impl Persistence for SqliteStore {
    fn record_enforcement(&self, record: &EnforcementRecord) -> Result<(), PersistError> {
        Ok(self.insert_enforcement(record)?)
    }

    fn record_event(&self, event: &NormalizedEvent) -> Result<(), PersistError> {
        self.insert_event(event)?;
        Ok(())
    }

    fn save_rule(&self, rule: &RuleDefinition) -> Result<(), PersistError> {
        Ok(self.upsert_rule(rule)?)
    }

    fn delete_rule(&self, rule_id: &str) -> Result<(), PersistError> {
        self.remove_rule(rule_id)?;
        Ok(())
    }

    fn load_rules(&self) -> Result<Vec<RuleDefinition>, PersistError> {
        Ok(self.rules()?)
    }
}
