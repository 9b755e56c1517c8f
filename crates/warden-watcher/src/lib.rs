//! Local client log watcher.
//!
//! Tails the newest `output_log_*.txt` in the client's log directory,
//! parses appended lines through a configurable grammar table, keeps a
//! reconstructed [`SessionState`] (current instance and roster) and
//! publishes the resulting events on the shared [`warden_types::EventBus`].

mod config;
mod error;
mod grammar;
mod location;
mod session;
mod watcher;

pub use config::WatcherConfig;
pub use error::WatcherError;
pub use grammar::{default_rules, Grammar, GrammarRule, LogEntry, ParsedLine, TIMESTAMP_WIDTH};
pub use location::LocationKey;
pub use session::{PresenceRecord, SessionState};
pub use watcher::ActivityWatcher;
