//! History event definitions.
//!
//! Events are pure data. They carry a position, a version and a typed
//! payload, and contain no transition logic. Once appended to a history
//! they are never mutated.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Kind tag of a history event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WorkflowExecutionStarted,
    WorkflowExecutionSignaled,
    WorkflowTaskScheduled,
    WorkflowTaskStarted,
    WorkflowTaskCompleted,
    TimerStarted,
    TimerFired,
    ActivityTaskScheduled,
    ActivityTaskCompleted,
    WorkflowExecutionCompleted,
    WorkflowExecutionFailed,
    WorkflowExecutionTerminated,
}

impl EventType {
    pub const ALL: [EventType; 12] = [
        EventType::WorkflowExecutionStarted,
        EventType::WorkflowExecutionSignaled,
        EventType::WorkflowTaskScheduled,
        EventType::WorkflowTaskStarted,
        EventType::WorkflowTaskCompleted,
        EventType::TimerStarted,
        EventType::TimerFired,
        EventType::ActivityTaskScheduled,
        EventType::ActivityTaskCompleted,
        EventType::WorkflowExecutionCompleted,
        EventType::WorkflowExecutionFailed,
        EventType::WorkflowExecutionTerminated,
    ];

    /// Only signals carry a side effect that must survive a branch merge.
    pub fn is_reapplicable(self) -> bool {
        matches!(self, EventType::WorkflowExecutionSignaled)
    }

    /// Close events. Nothing may follow them in a history.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            EventType::WorkflowExecutionCompleted
                | EventType::WorkflowExecutionFailed
                | EventType::WorkflowExecutionTerminated
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventType::WorkflowExecutionStarted => "workflow_execution_started",
            EventType::WorkflowExecutionSignaled => "workflow_execution_signaled",
            EventType::WorkflowTaskScheduled => "workflow_task_scheduled",
            EventType::WorkflowTaskStarted => "workflow_task_started",
            EventType::WorkflowTaskCompleted => "workflow_task_completed",
            EventType::TimerStarted => "timer_started",
            EventType::TimerFired => "timer_fired",
            EventType::ActivityTaskScheduled => "activity_task_scheduled",
            EventType::ActivityTaskCompleted => "activity_task_completed",
            EventType::WorkflowExecutionCompleted => "workflow_execution_completed",
            EventType::WorkflowExecutionFailed => "workflow_execution_failed",
            EventType::WorkflowExecutionTerminated => "workflow_execution_terminated",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque key/value metadata propagated with a signal.
pub type Header = BTreeMap<String, Vec<u8>>;

/// Payload of a `WorkflowExecutionSignaled` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalAttributes {
    pub signal_name: String,
    #[serde(default)]
    pub input: Vec<u8>,
    #[serde(default)]
    pub identity: String,
    #[serde(default)]
    pub header: Header,
}

/// Type-specific payload. The variant is expected to agree with the
/// event's `event_type`, but the kernel never assumes it does.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventAttributes {
    Started { first_task_backoff_secs: u64 },
    Signal(SignalAttributes),
    TaskScheduled { attempt: u32 },
    Timer { timer_id: String },
    #[default]
    None,
}

/// An immutable record in an execution's event log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct HistoryEvent {
    /// Monotonic position in the history, starting at 1.
    pub event_id: i64,
    /// Failover version of the cluster that produced the event.
    pub version: i64,
    pub event_type: EventType,
    #[serde(default)]
    pub attributes: EventAttributes,
}

impl HistoryEvent {
    pub fn new(event_id: i64, version: i64, event_type: EventType, attributes: EventAttributes) -> Self {
        Self {
            event_id,
            version,
            event_type,
            attributes,
        }
    }

    /// Build a signaled event.
    pub fn signaled(event_id: i64, version: i64, signal: SignalAttributes) -> Self {
        Self::new(
            event_id,
            version,
            EventType::WorkflowExecutionSignaled,
            EventAttributes::Signal(signal),
        )
    }

    /// Signal payload, if this event carries one.
    pub fn signal_attributes(&self) -> Option<&SignalAttributes> {
        match &self.attributes {
            EventAttributes::Signal(signal) => Some(signal),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    /// Parse an event from a fixture value.
    pub fn from_value(v: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(v.clone())
    }
}
