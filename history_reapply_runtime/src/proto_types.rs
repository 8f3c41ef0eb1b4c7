//! Hand-written protobuf types for the persisted history log.
//!
//! Uses prost derive macros for encode/decode without prost-build.
//! Field numbers are part of the on-disk format and never change.

use std::collections::BTreeMap;

use prost::Message;

// ── Event Type ─────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum ProtoEventType {
    Unspecified = 0,
    WorkflowExecutionStarted = 1,
    WorkflowExecutionSignaled = 2,
    WorkflowTaskScheduled = 3,
    WorkflowTaskStarted = 4,
    WorkflowTaskCompleted = 5,
    TimerStarted = 6,
    TimerFired = 7,
    ActivityTaskScheduled = 8,
    ActivityTaskCompleted = 9,
    WorkflowExecutionCompleted = 10,
    WorkflowExecutionFailed = 11,
    WorkflowExecutionTerminated = 12,
}

// ── History Event ──────────────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct ProtoHistoryEvent {
    #[prost(int64, tag = "1")]
    pub event_id: i64,
    #[prost(int64, tag = "2")]
    pub version: i64,
    #[prost(enumeration = "ProtoEventType", tag = "3")]
    pub event_type: i32,
    #[prost(oneof = "AttributesKind", tags = "4, 5, 6, 7")]
    pub attributes: Option<AttributesKind>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum AttributesKind {
    #[prost(message, tag = "4")]
    Started(StartedAttributes),
    #[prost(message, tag = "5")]
    Signal(ProtoSignalAttributes),
    #[prost(message, tag = "6")]
    TaskScheduled(TaskScheduledAttributes),
    #[prost(message, tag = "7")]
    Timer(TimerAttributes),
}

// ── Attributes ─────────────────────────────────────────────────

#[derive(Clone, PartialEq, Message)]
pub struct StartedAttributes {
    #[prost(uint64, tag = "1")]
    pub first_task_backoff_secs: u64,
}

#[derive(Clone, PartialEq, Message)]
pub struct ProtoSignalAttributes {
    #[prost(string, tag = "1")]
    pub signal_name: String,
    #[prost(bytes = "vec", tag = "2")]
    pub input: Vec<u8>,
    #[prost(string, tag = "3")]
    pub identity: String,
    #[prost(btree_map = "string, bytes", tag = "4")]
    pub header: BTreeMap<String, Vec<u8>>,
}

#[derive(Clone, PartialEq, Message)]
pub struct TaskScheduledAttributes {
    #[prost(uint32, tag = "1")]
    pub attempt: u32,
}

#[derive(Clone, PartialEq, Message)]
pub struct TimerAttributes {
    #[prost(string, tag = "1")]
    pub timer_id: String,
}

// ── Log Record ─────────────────────────────────────────────────

/// One frame of the history log.
#[derive(Clone, PartialEq, Message)]
pub struct ProtoLogRecord {
    #[prost(oneof = "LogRecordKind", tags = "1, 2")]
    pub record: Option<LogRecordKind>,
}

#[derive(Clone, PartialEq, prost::Oneof)]
pub enum LogRecordKind {
    #[prost(message, tag = "1")]
    Event(ProtoHistoryEvent),
    #[prost(message, tag = "2")]
    DedupResource(DedupResourceRecord),
}

/// A dedup resource recorded in the same batch as the events it guards.
#[derive(Clone, PartialEq, Message)]
pub struct DedupResourceRecord {
    #[prost(string, tag = "1")]
    pub resource_id: String,
}
