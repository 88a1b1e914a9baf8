use std::path::PathBuf;

/// Failures callers may want to tell apart. Surfaced wrapped in
/// `anyhow::Error`; use `downcast_ref::<MemoryError>()` to inspect.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("integrity check failed for session {session_id}: stored {expected}, computed {actual}")]
    IntegrityFailure {
        session_id: String,
        expected: String,
        actual: String,
    },

    #[error("session not found: {0}")]
    MissingSession(String),

    #[error("corrupt record in {path} (line {line}): {source}")]
    StoreCorruption {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}
