use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::grammar::{default_rules, GrammarRule};

/// Local log tailing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    /// Directory holding the client's output logs. `None` disables the watcher.
    pub log_dir: Option<PathBuf>,
    pub poll_interval_ms: u64,
    /// Log files are `<prefix>*.txt`.
    pub file_prefix: String,
    /// Grammar table; replaces the built-in rules when set.
    pub grammar: Vec<GrammarRule>,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            poll_interval_ms: 1_000,
            file_prefix: "output_log_".to_string(),
            grammar: default_rules(),
        }
    }
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}
