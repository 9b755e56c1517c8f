use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle phase of the push connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Connecting,
    Connected,
    Closing,
    ReconnectScheduled,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Closing => "closing",
            Self::ReconnectScheduled => "reconnect_scheduled",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection lifecycle notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConnectionEvent {
    PhaseChanged { phase: Phase },
    Connected,
    Disconnected {
        manual: bool,
        reason: Option<String>,
    },
    TokenUnavailable { error: String },
    ConnectionError { error: String },
    ReconnectScheduled { attempt: u32, delay_ms: u64 },
    /// Terminal: no further automatic reconnects until `connect` is called.
    ReconnectFailed { attempts: u32 },
    /// The server sent an `err` frame.
    RemoteError { message: String },
}

/// Point-in-time view of the connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub phase: Phase,
    pub attempts: u32,
    pub connecting: bool,
    pub manual: bool,
    /// Hex SHA-256 of the last accepted frame.
    pub last_fingerprint: Option<String>,
    pub connected_since: Option<DateTime<Utc>>,
    pub messages_received: u64,
    pub duplicates_dropped: u64,
}
