use crate::events::EventType;

/// Failures reported by a [`crate::state::MutableState`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("execution `{run_id}` is closed and cannot accept new events")]
    ExecutionClosed { run_id: String },
    #[error("execution `{run_id}` already has a pending task scheduled at event {scheduled_event_id}")]
    TaskAlreadyPending {
        run_id: String,
        scheduled_event_id: i64,
    },
    #[error("transition rejected: {0}")]
    Transition(#[from] TransitionError),
    #[error("state unavailable: {0}")]
    Unavailable(String),
}

/// Raised when an event cannot be folded into an execution.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("event id out of order: expected {expected}, got {got}")]
    EventIdOutOfOrder { expected: i64, got: i64 },
    #[error("event {event_id} ({event_type}) follows a terminal event")]
    AfterTerminal { event_id: i64, event_type: EventType },
    #[error("first event must be workflow_execution_started, got {event_type}")]
    MissingStart { event_type: EventType },
    #[error("event {event_id} ({event_type}) is missing its attributes")]
    MissingAttributes { event_id: i64, event_type: EventType },
    #[error("event {event_id} ({event_type}) has no matching pending task")]
    NoPendingTask { event_id: i64, event_type: EventType },
    #[error("event {event_id} schedules a task while task {pending_event_id} is pending")]
    TaskAlreadyPending { event_id: i64, pending_event_id: i64 },
}

/// Outcome of a failed reapplication call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReapplyError {
    #[error("unable to reapply events to closed execution `{run_id}`")]
    ClosedExecution { run_id: String },
    #[error("signaled event {event_id} (version {version}) carries no signal attributes")]
    MalformedEvent { event_id: i64, version: i64 },
    #[error("reapplication cancelled after {applied} event(s)")]
    Cancelled { applied: usize },
    #[error(transparent)]
    State(#[from] StateError),
}

impl ReapplyError {
    /// Whether retrying the same call can succeed without outside changes.
    pub fn is_retryable(&self) -> bool {
        match self {
            ReapplyError::State(StateError::ExecutionClosed { .. }) => false,
            ReapplyError::State(_) | ReapplyError::Cancelled { .. } => true,
            ReapplyError::ClosedExecution { .. } | ReapplyError::MalformedEvent { .. } => false,
        }
    }

    /// Internal errors signal a caller bug rather than a transient condition.
    pub fn is_internal(&self) -> bool {
        matches!(self, ReapplyError::ClosedExecution { .. })
    }
}

/// Broken structural property of an execution record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invariant violation [{check}]: {detail}")]
pub struct InvariantViolation {
    pub check: &'static str,
    pub detail: String,
}

impl InvariantViolation {
    pub fn new(check: &'static str, detail: impl Into<String>) -> Self {
        Self {
            check,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_execution_is_internal_and_final() {
        let err = ReapplyError::ClosedExecution {
            run_id: "r1".to_string(),
        };
        assert!(err.is_internal());
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "unable to reapply events to closed execution `r1`"
        );
    }

    #[test]
    fn downstream_failures_propagate_verbatim() {
        let inner = StateError::Unavailable("lease lost".to_string());
        let err = ReapplyError::from(inner.clone());
        assert_eq!(err.to_string(), inner.to_string());
        assert!(err.is_retryable());
        assert!(!err.is_internal());
    }
}
