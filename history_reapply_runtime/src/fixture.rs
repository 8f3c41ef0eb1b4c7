//! Branch-merge scenario fixtures, shared by the harness binary and tests.
//!
//! A fixture file is a JSON array of [`Scenario`]s. Each scenario describes
//! a target execution, the events of a losing branch, and what reapplying
//! that branch must produce.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use history_reapply::hashing::canonical_hash;
use history_reapply::{
    EventType, EventsReapplier, ExecutionState, ExecutionStatus, HistoryEvent, ReapplyContext,
    ReapplyError, Reapplier,
};

use crate::error::{io_error, json_error, RuntimeError};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    pub name: String,
    pub run_id: String,
    pub version: i64,
    #[serde(default)]
    pub first_task_backoff_secs: u64,
    /// Leave the first task pending instead of completing it.
    #[serde(default)]
    pub task_pending: bool,
    #[serde(default)]
    pub closed: bool,
    pub branch_events: Vec<HistoryEvent>,
    #[serde(default)]
    pub expected_reapplied: Vec<i64>,
    #[serde(default)]
    pub expected_error: Option<String>,
    #[serde(default)]
    pub expected_new_tasks: u64,
}

#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub name: String,
    pub failures: Vec<String>,
    pub hash: String,
}

impl ScenarioReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }
}

pub fn load_scenarios(path: &Path) -> Result<Vec<Scenario>, RuntimeError> {
    let raw = fs::read_to_string(path).map_err(|e| io_error(path, e))?;
    serde_json::from_str(&raw).map_err(|e| json_error(path, e))
}

impl Scenario {
    /// The execution the branch is reapplied onto.
    pub fn build_target(&self) -> Result<ExecutionState, RuntimeError> {
        let mut state = ExecutionState::start(&self.run_id, self.version, self.first_task_backoff_secs)?;
        if self.first_task_backoff_secs == 0 && !self.task_pending {
            state.start_pending_task()?;
            state.complete_pending_task()?;
        }
        if self.closed {
            state.close(ExecutionStatus::Completed)?;
        }
        Ok(state)
    }

    /// Reapply the branch twice and compare against the expectations.
    pub fn run(&self, reapplier: &Reapplier) -> Result<ScenarioReport, RuntimeError> {
        let ctx = ReapplyContext::background();
        let mut state = self.build_target()?;
        let tasks_before = scheduled_tasks(&state);
        let mut failures = Vec::new();

        let first = reapplier.reapply_events(&ctx, &mut state, &self.branch_events, &self.run_id);
        self.check_first(&first, &mut failures);

        let new_tasks = scheduled_tasks(&state) - tasks_before;
        if new_tasks != self.expected_new_tasks {
            failures.push(format!(
                "expected {} new tasks, got {new_tasks}",
                self.expected_new_tasks
            ));
        }

        let hash = canonical_hash(&state);
        let second = reapplier.reapply_events(&ctx, &mut state, &self.branch_events, &self.run_id);
        match (&first, &second) {
            (Ok(_), Ok(again)) if !again.is_empty() => {
                failures.push(format!("second pass reapplied {} events", again.len()));
            }
            (Ok(_), Err(e)) => failures.push(format!("second pass failed: {e}")),
            _ => {}
        }
        if canonical_hash(&state) != hash {
            failures.push("second pass changed the execution".to_string());
        }

        Ok(ScenarioReport {
            name: self.name.clone(),
            failures,
            hash,
        })
    }

    fn check_first(&self, result: &Result<Vec<HistoryEvent>, ReapplyError>, failures: &mut Vec<String>) {
        match (self.expected_error.as_deref(), result) {
            (None, Ok(applied)) => {
                let ids: Vec<i64> = applied.iter().map(|e| e.event_id).collect();
                if ids != self.expected_reapplied {
                    failures.push(format!(
                        "expected reapplied {:?}, got {ids:?}",
                        self.expected_reapplied
                    ));
                }
            }
            (None, Err(e)) => failures.push(format!("unexpected error: {e}")),
            (Some(kind), Err(e)) if error_kind(e) == kind => {}
            (Some(kind), Err(e)) => failures.push(format!("expected {kind}, got {e}")),
            (Some(kind), Ok(applied)) => {
                failures.push(format!("expected {kind}, reapplied {} events", applied.len()))
            }
        }
    }
}

/// Fixture name for an error variant.
pub fn error_kind(err: &ReapplyError) -> &'static str {
    match err {
        ReapplyError::ClosedExecution { .. } => "closed_execution",
        ReapplyError::MalformedEvent { .. } => "malformed_event",
        ReapplyError::Cancelled { .. } => "cancelled",
        ReapplyError::State(_) => "state",
    }
}

fn scheduled_tasks(state: &ExecutionState) -> u64 {
    state
        .history
        .iter()
        .filter(|e| e.event_type == EventType::WorkflowTaskScheduled)
        .count() as u64
}
