use warden_types::EventKind;

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("log i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid {kind} pattern: {source}")]
    InvalidPattern {
        kind: EventKind,
        #[source]
        source: regex::Error,
    },

    /// The grammar only produces location, world, presence and avatar kinds.
    #[error("event kind {0} cannot come from the local log")]
    UnsupportedKind(EventKind),
}
