//! Structural checks over an execution record.
//!
//! Each check returns the first violation it finds. Replay and snapshot
//! restore run these before trusting a rebuilt state.

use crate::dedup::DedupKey;
use crate::error::InvariantViolation;
use crate::events::EventType;
use crate::execution::{ExecutionState, ExecutionStatus};

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Run every check in order.
pub fn validate_invariants(state: &ExecutionState) -> Result<(), InvariantViolation> {
    check_starts_with_start_event(state)?;
    check_contiguous_event_ids(state)?;
    check_nothing_after_close(state)?;
    check_status_matches_history(state)?;
    check_pending_task_exists(state)?;
    check_dedup_resources(state)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Individual checks
// ---------------------------------------------------------------------------

fn check_starts_with_start_event(state: &ExecutionState) -> Result<(), InvariantViolation> {
    match state.history.first() {
        Some(first) if first.event_type == EventType::WorkflowExecutionStarted => Ok(()),
        Some(first) => Err(InvariantViolation::new(
            "starts_with_start_event",
            format!("first event is {}", first.event_type),
        )),
        None => Err(InvariantViolation::new("starts_with_start_event", "history is empty")),
    }
}

fn check_contiguous_event_ids(state: &ExecutionState) -> Result<(), InvariantViolation> {
    for (idx, event) in state.history.iter().enumerate() {
        let expected = idx as i64 + 1;
        if event.event_id != expected {
            return Err(InvariantViolation::new(
                "contiguous_event_ids",
                format!("position {idx} holds event {} (expected {expected})", event.event_id),
            ));
        }
    }
    if state.next_event_id != state.history.len() as i64 + 1 {
        return Err(InvariantViolation::new(
            "contiguous_event_ids",
            format!(
                "next_event_id {} does not follow {} events",
                state.next_event_id,
                state.history.len()
            ),
        ));
    }
    Ok(())
}

fn check_nothing_after_close(state: &ExecutionState) -> Result<(), InvariantViolation> {
    let last = state.history.len().saturating_sub(1);
    for (idx, event) in state.history.iter().enumerate() {
        if event.event_type.is_terminal() && idx != last {
            return Err(InvariantViolation::new(
                "nothing_after_close",
                format!("close event {} is followed by more events", event.event_id),
            ));
        }
    }
    Ok(())
}

fn check_status_matches_history(state: &ExecutionState) -> Result<(), InvariantViolation> {
    let closed_by = state
        .history
        .last()
        .map(|e| e.event_type)
        .filter(|t| t.is_terminal());
    let expected = match closed_by {
        Some(EventType::WorkflowExecutionCompleted) => ExecutionStatus::Completed,
        Some(EventType::WorkflowExecutionFailed) => ExecutionStatus::Failed,
        Some(_) => ExecutionStatus::Terminated,
        None => ExecutionStatus::Running,
    };
    if state.status != expected {
        return Err(InvariantViolation::new(
            "status_matches_history",
            format!("status {} but history implies {}", state.status.as_str(), expected.as_str()),
        ));
    }
    Ok(())
}

fn check_pending_task_exists(state: &ExecutionState) -> Result<(), InvariantViolation> {
    let Some(pending) = &state.pending_task else {
        return Ok(());
    };
    if state.status.is_terminal() {
        return Err(InvariantViolation::new(
            "pending_task_exists",
            "closed execution still has a pending task",
        ));
    }
    let scheduled = state
        .history
        .iter()
        .any(|e| e.event_id == pending.scheduled_event_id && e.event_type == EventType::WorkflowTaskScheduled);
    if !scheduled {
        return Err(InvariantViolation::new(
            "pending_task_exists",
            format!("no scheduled event {} in history", pending.scheduled_event_id),
        ));
    }
    Ok(())
}

fn check_dedup_resources(state: &ExecutionState) -> Result<(), InvariantViolation> {
    for resource in &state.dedup_resources {
        if DedupKey::parse_resource_id(resource).is_none() {
            return Err(InvariantViolation::new(
                "dedup_resources",
                format!("malformed resource id {resource:?}"),
            ));
        }
    }
    Ok(())
}
