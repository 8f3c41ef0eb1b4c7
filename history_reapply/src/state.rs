//! Capability interface over an authoritative execution record.
//!
//! The reapplier only ever sees an execution through this trait. The
//! owner of the record serializes access to it; implementations need no
//! internal locking.

use crate::dedup::DedupKey;
use crate::error::StateError;
use crate::events::{Header, HistoryEvent};

pub trait MutableState {
    /// True while the execution has not reached a terminal state.
    fn is_running(&self) -> bool;

    /// Membership test against keys recorded for this run.
    fn is_resource_duplicated(&self, key: &DedupKey) -> bool;

    /// Record `key`; later membership tests for it return true.
    fn record_duplicated_resource(&mut self, key: DedupKey);

    /// Append a signal to the history and return the new event.
    fn add_signal(
        &mut self,
        signal_name: &str,
        input: &[u8],
        identity: &str,
        header: &Header,
    ) -> Result<HistoryEvent, StateError>;

    /// True while the first task is held back by a start delay.
    fn is_pending_first_task_backoff(&self) -> bool;

    fn has_pending_task(&self) -> bool;

    /// Schedule a new, durable unit of work and return its scheduled event.
    fn schedule_task(&mut self) -> Result<HistoryEvent, StateError>;
}
