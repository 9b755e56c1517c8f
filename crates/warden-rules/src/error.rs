use std::time::Duration;
use warden_auth::AuthError;
use warden_exec::ExecError;
use warden_types::PersistError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Denied(#[from] AuthError),

    #[error("invalid rule '{rule_id}': {reason}")]
    InvalidRule { rule_id: String, reason: String },

    #[error("invalid pattern in rule '{rule_id}': {source}")]
    InvalidPattern {
        rule_id: String,
        #[source]
        source: regex::Error,
    },

    #[error("no user id supplied")]
    MissingSubject,

    #[error("rule not found: {0}")]
    RuleNotFound(String),

    #[error("platform call failed: {0}")]
    Api(#[from] ExecError),

    /// Terminal actions are paused after the platform rate-limited us.
    #[error("rate-limit cooldown active for another {}s", remaining.as_secs())]
    CoolingDown { remaining: Duration },

    #[error(transparent)]
    Persist(#[from] PersistError),
}
