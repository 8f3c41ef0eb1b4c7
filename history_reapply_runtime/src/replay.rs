//! Replay orchestrator: rebuild an execution from its history log.
//!
//! All folding is delegated to the kernel's transitions. Dedup resources
//! are not history events; they come from their own log records.

use history_reapply::hashing::canonical_hash;
use history_reapply::invariants::validate_invariants;
use history_reapply::{ExecutionState, HistoryEvent};

use crate::error::RuntimeError;
use crate::event_store::LogContents;

/// Fold `events` on top of `base`, add `dedup_resources`, validate.
pub fn replay_onto(
    mut base: ExecutionState,
    events: &[HistoryEvent],
    dedup_resources: &[String],
) -> Result<ExecutionState, RuntimeError> {
    for event in events {
        base.replay_event(event)?;
    }
    base.dedup_resources.extend(dedup_resources.iter().cloned());
    validate_invariants(&base)?;
    Ok(base)
}

/// Rebuild a run from a whole log, dedup resources included.
pub fn rebuild_from_log(run_id: &str, log: &LogContents) -> Result<ExecutionState, RuntimeError> {
    let first = log.events.first().ok_or_else(|| RuntimeError::EmptyHistory {
        run_id: run_id.to_string(),
    })?;
    replay_onto(ExecutionState::new(run_id, first.version), &log.events, &log.dedup_resources)
}

/// Rebuild a run from its complete history.
///
/// Returns the state and its canonical hash.
pub fn rebuild_state(run_id: &str, events: &[HistoryEvent]) -> Result<(ExecutionState, String), RuntimeError> {
    let first = events.first().ok_or_else(|| RuntimeError::EmptyHistory {
        run_id: run_id.to_string(),
    })?;
    let state = replay_onto(ExecutionState::new(run_id, first.version), events, &[])?;
    let hash = canonical_hash(&state);
    Ok((state, hash))
}

/// Replay twice and require identical hashes.
pub fn verify_determinism(run_id: &str, events: &[HistoryEvent]) -> Result<String, RuntimeError> {
    let (_, first) = rebuild_state(run_id, events)?;
    let (_, second) = rebuild_state(run_id, events)?;
    if first != second {
        return Err(RuntimeError::Nondeterministic { first, second });
    }
    Ok(first)
}
