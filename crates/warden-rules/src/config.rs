use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_history_capacity() -> usize {
    1000
}

fn default_rate_limit_cooldown_secs() -> u64 {
    60
}

fn default_settled_ttl_secs() -> u64 {
    600
}

fn default_sweep_interval_secs() -> u64 {
    300
}

/// Rule-engine tunables (`[engine]` in the config file).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Enforcement records kept in memory.
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    /// Cooldown after a 429 that carried no `Retry-After`.
    #[serde(default = "default_rate_limit_cooldown_secs")]
    pub rate_limit_cooldown_secs: u64,
    /// How long a handled join request is remembered for deduplication.
    #[serde(default = "default_settled_ttl_secs")]
    pub settled_ttl_secs: u64,
    /// Period of the pending-request sweep. `0` disables it.
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_capacity: default_history_capacity(),
            rate_limit_cooldown_secs: default_rate_limit_cooldown_secs(),
            settled_ttl_secs: default_settled_ttl_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl EngineConfig {
    pub fn rate_limit_cooldown(&self) -> Duration {
        Duration::from_secs(self.rate_limit_cooldown_secs)
    }

    pub fn settled_ttl(&self) -> Duration {
        Duration::from_secs(self.settled_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Option<Duration> {
        (self.sweep_interval_secs > 0).then(|| Duration::from_secs(self.sweep_interval_secs))
    }
}
