//! Embedded schema migrations, tracked in `_warden_migrations`.

use rusqlite::Connection;

use crate::error::StoreError;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

/// Applied in order. Append only.
const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "000_enforcement_records",
        sql: include_str!("migrations/000_enforcement_records.sql"),
    },
    Migration {
        name: "001_activity_events",
        sql: include_str!("migrations/001_activity_events.sql"),
    },
    Migration {
        name: "002_rules",
        sql: include_str!("migrations/002_rules.sql"),
    },
];

/// Applies every pending migration and returns how many ran.
pub fn run_migrations(conn: &Connection) -> Result<usize, StoreError> {
    run_migration_list(conn, MIGRATIONS)
}

fn run_migration_list(conn: &Connection, migrations: &[Migration]) -> Result<usize, StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _warden_migrations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|source| StoreError::Migration {
        name: "_warden_migrations_bootstrap",
        source,
    })?;

    let mut applied = 0;
    for migration in migrations {
        let done: bool = conn.query_row(
            "SELECT COUNT(*) > 0 FROM _warden_migrations WHERE name = ?1",
            [migration.name],
            |row| row.get(0),
        )?;
        if done {
            tracing::debug!(migration = migration.name, "migration already applied");
            continue;
        }

        tracing::info!(migration = migration.name, "applying migration");
        let failed = |source| StoreError::Migration {
            name: migration.name,
            source,
        };
        let tx = conn.unchecked_transaction().map_err(failed)?;
        tx.execute_batch(migration.sql).map_err(failed)?;
        tx.execute(
            "INSERT INTO _warden_migrations (name) VALUES (?1)",
            [migration.name],
        )
        .map_err(failed)?;
        tx.commit().map_err(failed)?;
        applied += 1;
    }
    Ok(applied)
}
