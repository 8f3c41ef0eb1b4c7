//! Canonical serialization and hashing of an execution record.
//!
//! Rules:
//!   - kernel_version first, then a fixed field order
//!   - history in event id order, attributes tagged by kind
//!   - dedup resources sorted (BTreeSet order)
//!   - header keys sorted (BTreeMap order), byte payloads as lowercase hex
//!   - UTF-8 JSON, no whitespace

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::events::{EventAttributes, HistoryEvent};
use crate::execution::ExecutionState;
use crate::KERNEL_VERSION;

/// Canonical UTF-8 JSON bytes of `state`.
pub fn canonical_serialize(state: &ExecutionState) -> Vec<u8> {
    build_canonical_value(state).to_string().into_bytes()
}

/// SHA-256 of the canonical serialization, lowercase hex.
pub fn canonical_hash(state: &ExecutionState) -> String {
    hex(&Sha256::digest(canonical_serialize(state)))
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn build_canonical_value(state: &ExecutionState) -> Value {
    let history: Vec<Value> = state.history.iter().map(canonical_event).collect();

    let pending = match &state.pending_task {
        Some(task) => {
            let mut m = Map::new();
            m.insert("scheduled_event_id".to_string(), task.scheduled_event_id.into());
            m.insert("attempt".to_string(), task.attempt.into());
            m.insert("started".to_string(), task.started.into());
            Value::Object(m)
        }
        None => Value::Null,
    };

    // kernel_version MUST stay first.
    let mut root = Map::new();
    root.insert("kernel_version".to_string(), KERNEL_VERSION.into());
    root.insert("run_id".to_string(), state.run_id.clone().into());
    root.insert("status".to_string(), state.status.as_str().into());
    root.insert("current_version".to_string(), state.current_version.into());
    root.insert("next_event_id".to_string(), state.next_event_id.into());
    root.insert("history".to_string(), Value::Array(history));
    root.insert(
        "dedup_resources".to_string(),
        Value::Array(state.dedup_resources.iter().cloned().map(Value::String).collect()),
    );
    root.insert("pending_task".to_string(), pending);
    root.insert("first_task_backoff".to_string(), state.first_task_backoff.into());
    root.insert("signal_count".to_string(), state.signal_count.into());
    root.insert("tasks_scheduled".to_string(), state.tasks_scheduled.into());
    Value::Object(root)
}

fn canonical_event(event: &HistoryEvent) -> Value {
    let mut m = Map::new();
    m.insert("event_id".to_string(), event.event_id.into());
    m.insert("version".to_string(), event.version.into());
    m.insert("event_type".to_string(), event.event_type.as_str().into());
    m.insert("attributes".to_string(), canonical_attributes(&event.attributes));
    Value::Object(m)
}

fn canonical_attributes(attributes: &EventAttributes) -> Value {
    let mut m = Map::new();
    match attributes {
        EventAttributes::Started {
            first_task_backoff_secs,
        } => {
            m.insert("kind".to_string(), "started".into());
            m.insert("first_task_backoff_secs".to_string(), (*first_task_backoff_secs).into());
        }
        EventAttributes::Signal(signal) => {
            m.insert("kind".to_string(), "signal".into());
            m.insert("signal_name".to_string(), signal.signal_name.clone().into());
            m.insert("input".to_string(), hex(&signal.input).into());
            m.insert("identity".to_string(), signal.identity.clone().into());
            let header: Map<String, Value> = signal
                .header
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(hex(v))))
                .collect();
            m.insert("header".to_string(), Value::Object(header));
        }
        EventAttributes::TaskScheduled { attempt } => {
            m.insert("kind".to_string(), "task_scheduled".into());
            m.insert("attempt".to_string(), (*attempt).into());
        }
        EventAttributes::Timer { timer_id } => {
            m.insert("kind".to_string(), "timer".into());
            m.insert("timer_id".to_string(), timer_id.clone().into());
        }
        EventAttributes::None => {
            m.insert("kind".to_string(), "none".into());
        }
    }
    Value::Object(m)
}
