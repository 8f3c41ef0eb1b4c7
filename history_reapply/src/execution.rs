//! In-memory execution record.
//!
//! A complete, self-validating implementation of [`MutableState`] used by
//! the runtime sessions and by tests. Every change to the history is an
//! event folded in through [`crate::transitions::apply_event`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::dedup::DedupKey;
use crate::error::StateError;
use crate::events::{EventAttributes, EventType, Header, HistoryEvent, SignalAttributes};
use crate::state::MutableState;
use crate::transitions;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Terminated,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Terminated => "terminated",
        }
    }

    /// Close event recorded when entering this status.
    pub fn close_event_type(self) -> Option<EventType> {
        match self {
            ExecutionStatus::Running => None,
            ExecutionStatus::Completed => Some(EventType::WorkflowExecutionCompleted),
            ExecutionStatus::Failed => Some(EventType::WorkflowExecutionFailed),
            ExecutionStatus::Terminated => Some(EventType::WorkflowExecutionTerminated),
        }
    }
}

/// Outstanding workflow task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PendingTask {
    pub scheduled_event_id: i64,
    pub attempt: u32,
    pub started: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExecutionState {
    pub run_id: String,
    pub status: ExecutionStatus,
    /// Version stamped on events this state appends.
    pub current_version: i64,
    pub next_event_id: i64,
    pub history: Vec<HistoryEvent>,
    /// Recorded dedup resource ids. Never evicted.
    pub dedup_resources: BTreeSet<String>,
    pub pending_task: Option<PendingTask>,
    pub first_task_backoff: bool,
    pub signal_count: u64,
    pub tasks_scheduled: u64,
}

impl ExecutionState {
    /// An empty record with no history. Only replay starts from here.
    pub fn new(run_id: impl Into<String>, version: i64) -> Self {
        Self {
            run_id: run_id.into(),
            status: ExecutionStatus::Running,
            current_version: version,
            next_event_id: 1,
            history: Vec::new(),
            dedup_resources: BTreeSet::new(),
            pending_task: None,
            first_task_backoff: false,
            signal_count: 0,
            tasks_scheduled: 0,
        }
    }

    /// Start a run. Without a start delay the first task is scheduled
    /// straight away.
    pub fn start(
        run_id: impl Into<String>,
        version: i64,
        first_task_backoff_secs: u64,
    ) -> Result<Self, StateError> {
        let mut state = Self::new(run_id, version);
        state.append(
            EventType::WorkflowExecutionStarted,
            EventAttributes::Started {
                first_task_backoff_secs,
            },
        )?;
        if first_task_backoff_secs == 0 {
            state.schedule_task()?;
        }
        Ok(state)
    }

    pub fn last_event_id(&self) -> i64 {
        self.next_event_id - 1
    }

    /// Events appended after `event_id`.
    pub fn history_after(&self, event_id: i64) -> &[HistoryEvent] {
        let start = self
            .history
            .iter()
            .position(|e| e.event_id > event_id)
            .unwrap_or(self.history.len());
        &self.history[start..]
    }

    pub fn signals(&self) -> impl Iterator<Item = &SignalAttributes> {
        self.history.iter().filter_map(HistoryEvent::signal_attributes)
    }

    /// Stamp and fold a new event at the end of the history.
    pub fn append(
        &mut self,
        event_type: EventType,
        attributes: EventAttributes,
    ) -> Result<HistoryEvent, StateError> {
        let event = HistoryEvent::new(self.next_event_id, self.current_version, event_type, attributes);
        transitions::apply_event(self, &event)?;
        Ok(event)
    }

    /// Fold an event produced elsewhere, keeping its id and version.
    pub fn replay_event(&mut self, event: &HistoryEvent) -> Result<(), StateError> {
        transitions::apply_event(self, event)?;
        Ok(())
    }

    /// Record a version bump after a failover.
    pub fn set_current_version(&mut self, version: i64) {
        self.current_version = version;
    }

    /// Start delay elapsed: create the first task.
    pub fn fire_first_task_backoff(&mut self) -> Result<HistoryEvent, StateError> {
        self.schedule_task()
    }

    /// A worker picked up the pending task.
    pub fn start_pending_task(&mut self) -> Result<HistoryEvent, StateError> {
        self.append(EventType::WorkflowTaskStarted, EventAttributes::None)
    }

    /// The pending task finished; signals up to here are processed.
    pub fn complete_pending_task(&mut self) -> Result<HistoryEvent, StateError> {
        self.append(EventType::WorkflowTaskCompleted, EventAttributes::None)
    }

    /// Close the run with a terminal `status`.
    pub fn close(&mut self, status: ExecutionStatus) -> Result<HistoryEvent, StateError> {
        let Some(event_type) = status.close_event_type() else {
            return Err(StateError::Unavailable(format!(
                "`{}` is not a terminal status",
                status.as_str()
            )));
        };
        if self.status.is_terminal() {
            return Err(self.closed());
        }
        self.append(event_type, EventAttributes::None)
    }

    fn closed(&self) -> StateError {
        StateError::ExecutionClosed {
            run_id: self.run_id.clone(),
        }
    }
}

impl MutableState for ExecutionState {
    fn is_running(&self) -> bool {
        self.status == ExecutionStatus::Running
    }

    fn is_resource_duplicated(&self, key: &DedupKey) -> bool {
        self.dedup_resources.contains(&key.resource_id())
    }

    fn record_duplicated_resource(&mut self, key: DedupKey) {
        self.dedup_resources.insert(key.resource_id());
    }

    fn add_signal(
        &mut self,
        signal_name: &str,
        input: &[u8],
        identity: &str,
        header: &Header,
    ) -> Result<HistoryEvent, StateError> {
        if !self.is_running() {
            return Err(self.closed());
        }
        self.append(
            EventType::WorkflowExecutionSignaled,
            EventAttributes::Signal(SignalAttributes {
                signal_name: signal_name.to_string(),
                input: input.to_vec(),
                identity: identity.to_string(),
                header: header.clone(),
            }),
        )
    }

    fn is_pending_first_task_backoff(&self) -> bool {
        self.first_task_backoff
    }

    fn has_pending_task(&self) -> bool {
        self.pending_task.is_some()
    }

    fn schedule_task(&mut self) -> Result<HistoryEvent, StateError> {
        if !self.is_running() {
            return Err(self.closed());
        }
        if let Some(pending) = &self.pending_task {
            return Err(StateError::TaskAlreadyPending {
                run_id: self.run_id.clone(),
                scheduled_event_id: pending.scheduled_event_id,
            });
        }
        let attempt = 1;
        self.append(
            EventType::WorkflowTaskScheduled,
            EventAttributes::TaskScheduled { attempt },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_without_backoff_schedules_first_task() {
        let state = ExecutionState::start("r1", 1, 0).unwrap();
        assert_eq!(state.history.len(), 2);
        assert!(state.has_pending_task());
        assert!(!state.is_pending_first_task_backoff());
    }

    #[test]
    fn start_with_backoff_defers_first_task() {
        let mut state = ExecutionState::start("r1", 1, 60).unwrap();
        assert_eq!(state.history.len(), 1);
        assert!(!state.has_pending_task());
        assert!(state.is_pending_first_task_backoff());

        state.fire_first_task_backoff().unwrap();
        assert!(state.has_pending_task());
        assert!(!state.is_pending_first_task_backoff());
    }

    #[test]
    fn signals_are_stamped_with_current_version() {
        let mut state = ExecutionState::start("r1", 7, 0).unwrap();
        let event = state.add_signal("go", b"payload", "client", &Header::new()).unwrap();
        assert_eq!(event.event_id, 3);
        assert_eq!(event.version, 7);
        assert_eq!(state.signal_count, 1);
        assert_eq!(state.signals().count(), 1);
    }

    #[test]
    fn closed_execution_rejects_signals_and_tasks() {
        let mut state = ExecutionState::start("r1", 1, 0).unwrap();
        state.close(ExecutionStatus::Completed).unwrap();
        assert!(!state.is_running());
        assert_eq!(
            state.add_signal("late", &[], "", &Header::new()),
            Err(StateError::ExecutionClosed {
                run_id: "r1".to_string()
            })
        );
        assert!(state.schedule_task().is_err());
        assert!(state.close(ExecutionStatus::Failed).is_err());
    }

    #[test]
    fn schedule_rejects_second_pending_task() {
        let mut state = ExecutionState::start("r1", 1, 0).unwrap();
        assert_eq!(
            state.schedule_task(),
            Err(StateError::TaskAlreadyPending {
                run_id: "r1".to_string(),
                scheduled_event_id: 2
            })
        );
        state.start_pending_task().unwrap();
        state.complete_pending_task().unwrap();
        assert!(state.schedule_task().is_ok());
    }

    #[test]
    fn dedup_membership() {
        let mut state = ExecutionState::start("r1", 1, 0).unwrap();
        let key = DedupKey::new("r1", 5, 1);
        assert!(!state.is_resource_duplicated(&key));
        state.record_duplicated_resource(key.clone());
        assert!(state.is_resource_duplicated(&key));
        assert!(!state.is_resource_duplicated(&DedupKey::new("r1", 5, 2)));
    }

    #[test]
    fn history_after_returns_tail() {
        let mut state = ExecutionState::start("r1", 1, 0).unwrap();
        let mark = state.last_event_id();
        state.add_signal("a", &[], "", &Header::new()).unwrap();
        state.add_signal("b", &[], "", &Header::new()).unwrap();
        let tail: Vec<i64> = state.history_after(mark).iter().map(|e| e.event_id).collect();
        assert_eq!(tail, vec![3, 4]);
        assert!(state.history_after(state.last_event_id()).is_empty());
    }
}
