use warden_exec::ExecError;

/// Errors returned by [`crate::EventBridge`] operations.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("push connection already established")]
    AlreadyConnected,

    #[error("a connection attempt is already in flight")]
    ConnectInFlight,

    /// Every token strategy failed.
    #[error("session token unavailable: {0}")]
    TokenUnavailable(#[source] ExecError),

    #[error("invalid pipeline url: {0}")]
    InvalidUrl(String),

    /// The websocket handshake or transport failed.
    #[error("connection failed: {0}")]
    Connection(String),

    /// A disconnect or newer connect overtook this attempt.
    #[error("connection attempt superseded")]
    Superseded,
}
