//! Proto ↔ kernel conversion bridge.
//!
//! Encoding never fails. Decoding rejects unknown event types and
//! attribute variants that disagree with the event type.

use history_reapply::{EventAttributes, EventType, HistoryEvent, SignalAttributes};

use crate::error::RuntimeError;
use crate::proto_types::*;

fn event_type_to_proto(event_type: EventType) -> ProtoEventType {
    match event_type {
        EventType::WorkflowExecutionStarted => ProtoEventType::WorkflowExecutionStarted,
        EventType::WorkflowExecutionSignaled => ProtoEventType::WorkflowExecutionSignaled,
        EventType::WorkflowTaskScheduled => ProtoEventType::WorkflowTaskScheduled,
        EventType::WorkflowTaskStarted => ProtoEventType::WorkflowTaskStarted,
        EventType::WorkflowTaskCompleted => ProtoEventType::WorkflowTaskCompleted,
        EventType::TimerStarted => ProtoEventType::TimerStarted,
        EventType::TimerFired => ProtoEventType::TimerFired,
        EventType::ActivityTaskScheduled => ProtoEventType::ActivityTaskScheduled,
        EventType::ActivityTaskCompleted => ProtoEventType::ActivityTaskCompleted,
        EventType::WorkflowExecutionCompleted => ProtoEventType::WorkflowExecutionCompleted,
        EventType::WorkflowExecutionFailed => ProtoEventType::WorkflowExecutionFailed,
        EventType::WorkflowExecutionTerminated => ProtoEventType::WorkflowExecutionTerminated,
    }
}

fn event_type_from_proto(raw: i32, event_id: i64) -> Result<EventType, RuntimeError> {
    let proto = ProtoEventType::try_from(raw).map_err(|_| RuntimeError::Decode {
        event_id,
        reason: format!("unknown event type {raw}"),
    })?;
    Ok(match proto {
        ProtoEventType::Unspecified => {
            return Err(RuntimeError::Decode {
                event_id,
                reason: "event type unspecified".to_string(),
            })
        }
        ProtoEventType::WorkflowExecutionStarted => EventType::WorkflowExecutionStarted,
        ProtoEventType::WorkflowExecutionSignaled => EventType::WorkflowExecutionSignaled,
        ProtoEventType::WorkflowTaskScheduled => EventType::WorkflowTaskScheduled,
        ProtoEventType::WorkflowTaskStarted => EventType::WorkflowTaskStarted,
        ProtoEventType::WorkflowTaskCompleted => EventType::WorkflowTaskCompleted,
        ProtoEventType::TimerStarted => EventType::TimerStarted,
        ProtoEventType::TimerFired => EventType::TimerFired,
        ProtoEventType::ActivityTaskScheduled => EventType::ActivityTaskScheduled,
        ProtoEventType::ActivityTaskCompleted => EventType::ActivityTaskCompleted,
        ProtoEventType::WorkflowExecutionCompleted => EventType::WorkflowExecutionCompleted,
        ProtoEventType::WorkflowExecutionFailed => EventType::WorkflowExecutionFailed,
        ProtoEventType::WorkflowExecutionTerminated => EventType::WorkflowExecutionTerminated,
    })
}

/// Convert a kernel event for the append-only log.
pub fn history_to_proto(event: &HistoryEvent) -> ProtoHistoryEvent {
    let attributes = match &event.attributes {
        EventAttributes::Started {
            first_task_backoff_secs,
        } => Some(AttributesKind::Started(StartedAttributes {
            first_task_backoff_secs: *first_task_backoff_secs,
        })),
        EventAttributes::Signal(signal) => Some(AttributesKind::Signal(ProtoSignalAttributes {
            signal_name: signal.signal_name.clone(),
            input: signal.input.clone(),
            identity: signal.identity.clone(),
            header: signal.header.clone(),
        })),
        EventAttributes::TaskScheduled { attempt } => {
            Some(AttributesKind::TaskScheduled(TaskScheduledAttributes { attempt: *attempt }))
        }
        EventAttributes::Timer { timer_id } => Some(AttributesKind::Timer(TimerAttributes {
            timer_id: timer_id.clone(),
        })),
        EventAttributes::None => None,
    };

    ProtoHistoryEvent {
        event_id: event.event_id,
        version: event.version,
        event_type: event_type_to_proto(event.event_type) as i32,
        attributes,
    }
}

/// Convert a decoded log frame back to a kernel event.
pub fn proto_to_history(proto: &ProtoHistoryEvent) -> Result<HistoryEvent, RuntimeError> {
    let event_type = event_type_from_proto(proto.event_type, proto.event_id)?;

    let attributes = match &proto.attributes {
        None => EventAttributes::None,
        Some(AttributesKind::Started(a)) => EventAttributes::Started {
            first_task_backoff_secs: a.first_task_backoff_secs,
        },
        Some(AttributesKind::Signal(s)) => EventAttributes::Signal(SignalAttributes {
            signal_name: s.signal_name.clone(),
            input: s.input.clone(),
            identity: s.identity.clone(),
            header: s.header.clone(),
        }),
        Some(AttributesKind::TaskScheduled(t)) => EventAttributes::TaskScheduled { attempt: t.attempt },
        Some(AttributesKind::Timer(t)) => EventAttributes::Timer {
            timer_id: t.timer_id.clone(),
        },
    };

    let consistent = match (&attributes, event_type) {
        (EventAttributes::None, EventType::WorkflowExecutionSignaled) => false,
        (EventAttributes::Signal(_), t) => t == EventType::WorkflowExecutionSignaled,
        (EventAttributes::Started { .. }, t) => t == EventType::WorkflowExecutionStarted,
        (EventAttributes::TaskScheduled { .. }, t) => t == EventType::WorkflowTaskScheduled,
        (EventAttributes::Timer { .. }, t) => matches!(t, EventType::TimerStarted | EventType::TimerFired),
        (EventAttributes::None, _) => true,
    };
    if !consistent {
        return Err(RuntimeError::Decode {
            event_id: proto.event_id,
            reason: format!("attributes do not match event type {event_type}"),
        });
    }

    Ok(HistoryEvent::new(proto.event_id, proto.version, event_type, attributes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;

    #[test]
    fn signal_survives_encoding() {
        let event = HistoryEvent::signaled(
            9,
            4,
            SignalAttributes {
                signal_name: "approve".to_string(),
                input: vec![0, 1, 2],
                identity: "ops".to_string(),
                header: [("k".to_string(), vec![7])].into_iter().collect(),
            },
        );
        let bytes = history_to_proto(&event).encode_to_vec();
        let decoded = ProtoHistoryEvent::decode(bytes.as_slice()).unwrap();
        assert_eq!(proto_to_history(&decoded).unwrap(), event);
    }

    #[test]
    fn signal_without_attributes_is_rejected() {
        let proto = ProtoHistoryEvent {
            event_id: 3,
            version: 1,
            event_type: ProtoEventType::WorkflowExecutionSignaled as i32,
            attributes: None,
        };
        assert!(matches!(
            proto_to_history(&proto),
            Err(RuntimeError::Decode { event_id: 3, .. })
        ));
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let proto = ProtoHistoryEvent {
            event_id: 1,
            version: 1,
            event_type: 99,
            attributes: None,
        };
        assert!(proto_to_history(&proto).is_err());
    }
}
