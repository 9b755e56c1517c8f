use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Push connection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Websocket endpoint; the token is appended as `authToken`.
    pub url: String,
    /// Unit delay multiplied by the attempt number.
    pub reconnect_base_ms: u64,
    /// Largest multiplier applied to `reconnect_base_ms`.
    pub reconnect_cap: u32,
    /// Reconnect attempts before giving up with `ReconnectFailed`.
    pub max_attempts: u32,
    /// Forced reconnect interval while connected. `0` disables it.
    pub stability_interval_secs: u64,
    /// Pause between teardown and reconnect during a forced reconnect.
    pub settle_delay_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            reconnect_base_ms: 5_000,
            reconnect_cap: 6,
            max_attempts: 10,
            stability_interval_secs: 600,
            settle_delay_ms: 1_000,
        }
    }
}

fn default_url() -> String {
    "wss://pipeline.vrchat.cloud/".to_string()
}

impl BridgeConfig {
    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = attempt.clamp(1, self.reconnect_cap.max(1));
        Duration::from_millis(self.reconnect_base_ms.saturating_mul(u64::from(factor)))
    }

    pub fn stability_interval(&self) -> Option<Duration> {
        (self.stability_interval_secs > 0).then(|| Duration::from_secs(self.stability_interval_secs))
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
}
