//! SQLite persistence for Warden.
//!
//! Provides the `r2d2` connection pool with WAL-mode initialization, the
//! embedded schema migrations, and [`SqliteStore`], the durable
//! implementation of [`warden_types::Persistence`]. Enforcement records and
//! activity events are append-only; rules are upserted and keep the order in
//! which they were first defined.

mod error;
mod migrations;
mod pool;
mod store;

pub use error::StoreError;
pub use migrations::run_migrations;
pub use pool::{create_pool, DbPool, DbRuntimeSettings};
pub use store::{SqliteStore, StoredEvent};
