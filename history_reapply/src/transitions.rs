//! Transition logic for the in-memory execution record.
//!
//! ALL history-driven mutation of an [`ExecutionState`] lives here. Live
//! appends and replay go through the same function, so a replayed history
//! always yields the state that produced it.

use crate::error::TransitionError;
use crate::events::{EventAttributes, EventType, HistoryEvent};
use crate::execution::{ExecutionState, ExecutionStatus, PendingTask};

/// Fold `event` into `state`. On error `state` is left untouched.
pub fn apply_event(state: &mut ExecutionState, event: &HistoryEvent) -> Result<(), TransitionError> {
    check_position(state, event)?;

    match event.event_type {
        EventType::WorkflowExecutionStarted => apply_started(state, event)?,
        EventType::WorkflowExecutionSignaled => apply_signaled(state, event)?,
        EventType::WorkflowTaskScheduled => apply_task_scheduled(state, event)?,
        EventType::WorkflowTaskStarted => apply_task_started(state, event)?,
        EventType::WorkflowTaskCompleted => apply_task_completed(state, event)?,
        EventType::WorkflowExecutionCompleted => close(state, ExecutionStatus::Completed),
        EventType::WorkflowExecutionFailed => close(state, ExecutionStatus::Failed),
        EventType::WorkflowExecutionTerminated => close(state, ExecutionStatus::Terminated),
        EventType::TimerStarted
        | EventType::TimerFired
        | EventType::ActivityTaskScheduled
        | EventType::ActivityTaskCompleted => {}
    }

    state.history.push(event.clone());
    state.next_event_id = event.event_id + 1;
    state.current_version = event.version;
    Ok(())
}

fn check_position(state: &ExecutionState, event: &HistoryEvent) -> Result<(), TransitionError> {
    if state.status.is_terminal() {
        return Err(TransitionError::AfterTerminal {
            event_id: event.event_id,
            event_type: event.event_type,
        });
    }
    if event.event_id != state.next_event_id {
        return Err(TransitionError::EventIdOutOfOrder {
            expected: state.next_event_id,
            got: event.event_id,
        });
    }
    let is_start = event.event_type == EventType::WorkflowExecutionStarted;
    if state.history.is_empty() != is_start {
        return Err(TransitionError::MissingStart {
            event_type: event.event_type,
        });
    }
    Ok(())
}

fn missing_attributes(event: &HistoryEvent) -> TransitionError {
    TransitionError::MissingAttributes {
        event_id: event.event_id,
        event_type: event.event_type,
    }
}

fn apply_started(state: &mut ExecutionState, event: &HistoryEvent) -> Result<(), TransitionError> {
    let EventAttributes::Started {
        first_task_backoff_secs,
    } = event.attributes
    else {
        return Err(missing_attributes(event));
    };
    state.first_task_backoff = first_task_backoff_secs > 0;
    Ok(())
}

fn apply_signaled(state: &mut ExecutionState, event: &HistoryEvent) -> Result<(), TransitionError> {
    if event.signal_attributes().is_none() {
        return Err(missing_attributes(event));
    }
    state.signal_count += 1;
    Ok(())
}

fn apply_task_scheduled(state: &mut ExecutionState, event: &HistoryEvent) -> Result<(), TransitionError> {
    let EventAttributes::TaskScheduled { attempt } = event.attributes else {
        return Err(missing_attributes(event));
    };
    if let Some(pending) = &state.pending_task {
        return Err(TransitionError::TaskAlreadyPending {
            event_id: event.event_id,
            pending_event_id: pending.scheduled_event_id,
        });
    }
    state.pending_task = Some(PendingTask {
        scheduled_event_id: event.event_id,
        attempt,
        started: false,
    });
    // Once any task exists the start delay no longer applies.
    state.first_task_backoff = false;
    state.tasks_scheduled += 1;
    Ok(())
}

fn apply_task_started(state: &mut ExecutionState, event: &HistoryEvent) -> Result<(), TransitionError> {
    match state.pending_task.as_mut() {
        Some(pending) if !pending.started => {
            pending.started = true;
            Ok(())
        }
        _ => Err(TransitionError::NoPendingTask {
            event_id: event.event_id,
            event_type: event.event_type,
        }),
    }
}

fn apply_task_completed(state: &mut ExecutionState, event: &HistoryEvent) -> Result<(), TransitionError> {
    match &state.pending_task {
        Some(pending) if pending.started => {
            state.pending_task = None;
            Ok(())
        }
        _ => Err(TransitionError::NoPendingTask {
            event_id: event.event_id,
            event_type: event.event_type,
        }),
    }
}

fn close(state: &mut ExecutionState, status: ExecutionStatus) {
    state.status = status;
    state.pending_task = None;
    state.first_task_backoff = false;
}
