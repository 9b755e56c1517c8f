//! Normalized error type for remote operations.

use std::time::Duration;

/// Every failure of a remote operation, whatever its underlying cause.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExecError {
    /// The platform refused the session credentials (401/403).
    #[error("platform rejected the session (HTTP {status})")]
    Unauthorized { status: u16 },

    #[error("not found: {0}")]
    NotFound(String),

    /// HTTP 429. Callers should cool down instead of retrying immediately.
    #[error("rate limited by platform")]
    RateLimited { retry_after: Option<Duration> },

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// Transport-level failure (DNS, TLS, connect, timeout).
    #[error("connection error: {0}")]
    Connection(String),

    /// The response arrived but could not be decoded.
    #[error("invalid response: {0}")]
    Decode(String),

    /// No active session is available to authenticate the call.
    #[error("no active session")]
    NoSession,

    #[error("operation failed: {0}")]
    Failed(String),

    /// Every strategy of a fallback chain failed.
    #[error("all {attempts} strategies failed; last error: {last}")]
    StrategyExhausted { attempts: usize, last: Box<ExecError> },

    #[error("no strategies supplied")]
    NoStrategies,
}

impl ExecError {
    /// Maps an HTTP status and response body onto the taxonomy.
    pub fn from_status(status: u16, body: &str, retry_after: Option<Duration>) -> Self {
        match status {
            401 | 403 => Self::Unauthorized { status },
            404 => Self::NotFound(truncate(body)),
            429 => Self::RateLimited { retry_after },
            _ => Self::Http {
                status,
                message: truncate(body),
            },
        }
    }

    /// Unwraps nested `StrategyExhausted` errors to the last concrete cause.
    pub fn root(&self) -> &ExecError {
        let mut current = self;
        while let Self::StrategyExhausted { last, .. } = current {
            current = last;
        }
        current
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self.root(), Self::RateLimited { .. })
    }

    /// The server-suggested cooldown, when rate limited.
    pub fn retry_after(&self) -> Option<Duration> {
        match self.root() {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

fn truncate(body: &str) -> String {
    const MAX: usize = 256;
    if body.len() <= MAX {
        return body.to_string();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}
