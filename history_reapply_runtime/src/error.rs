use std::path::Path;

use history_reapply::{InvariantViolation, ReapplyError, StateError};

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("corrupt history log {path}: {reason}")]
    CorruptLog { path: String, reason: String },
    #[error("cannot decode event {event_id}: {reason}")]
    Decode { event_id: i64, reason: String },
    #[error("history log sequence violation: expected event {expected}, got {got}")]
    SequenceViolation { expected: i64, got: i64 },
    #[error("json error at {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("execution `{run_id}` has no history")]
    EmptyHistory { run_id: String },
    #[error("execution `{run_id}` already exists")]
    RunExists { run_id: String },
    #[error("session lock for `{run_id}` is poisoned")]
    LockPoisoned { run_id: String },
    #[error(transparent)]
    Reapply(#[from] ReapplyError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Invariant(#[from] InvariantViolation),
    #[error("determinism failure: replays produced {first} and {second}")]
    Nondeterministic { first: String, second: String },
}

pub(crate) fn io_error(path: &Path, source: std::io::Error) -> RuntimeError {
    RuntimeError::Io {
        path: path.display().to_string(),
        source,
    }
}

pub(crate) fn json_error(path: &Path, source: serde_json::Error) -> RuntimeError {
    RuntimeError::Json {
        path: path.display().to_string(),
        source,
    }
}
