//! Signal reapplication.
//!
//! After a history branch conflict is resolved, the signals recorded only
//! on the losing branch must still reach the surviving execution. The
//! reapplier filters a branch's events down to signals not yet applied to
//! the target run, appends them to the target's history, records a dedup
//! key for each, and makes sure a task exists to process them.
//!
//! Per call:
//!   1. Filter: signals only, in input order, skipping recorded keys and
//!      repeats within the batch
//!   2. Nothing left: return an empty result
//!   3. Target not running: fail, nothing appended
//!   4. Append each signal, then record its key; stop at the first failure
//!   5. Schedule a task unless one is pending or the first task is delayed
//!
//! Appends made before a failure are kept. Their keys are recorded, so a
//! retry of the whole call skips them and converges.

use std::collections::HashSet;

use tracing::{debug, info, info_span, warn};

use crate::context::ReapplyContext;
use crate::dedup::DedupKey;
use crate::error::ReapplyError;
use crate::events::HistoryEvent;
use crate::metrics::{results, ReapplyMetrics};
use crate::state::MutableState;

pub trait EventsReapplier {
    /// Reapply the signals in `events` to `state` on behalf of `run_id`.
    ///
    /// Returns the events newly applied, in input order. An empty result
    /// means there was nothing new to apply.
    fn reapply_events(
        &self,
        ctx: &ReapplyContext,
        state: &mut dyn MutableState,
        events: &[HistoryEvent],
        run_id: &str,
    ) -> Result<Vec<HistoryEvent>, ReapplyError>;
}

/// Stateless reapplier. Safe to share between any number of callers.
#[derive(Debug, Clone, Default)]
pub struct Reapplier {
    metrics: ReapplyMetrics,
}

impl Reapplier {
    pub fn new(metrics: ReapplyMetrics) -> Self {
        Self { metrics }
    }

    fn filter_events<'a>(
        &self,
        state: &dyn MutableState,
        events: &'a [HistoryEvent],
        run_id: &str,
    ) -> Result<Vec<&'a HistoryEvent>, ReapplyError> {
        let mut candidates = Vec::new();
        let mut batch_keys = HashSet::new();
        let mut duplicates = 0usize;
        for event in events {
            if !event.event_type.is_reapplicable() {
                continue;
            }
            // Never appended as an empty signal: the whole batch is
            // rejected before anything is written.
            if event.signal_attributes().is_none() {
                return Err(ReapplyError::MalformedEvent {
                    event_id: event.event_id,
                    version: event.version,
                });
            }
            let key = DedupKey::event_reapplied(run_id, event);
            if state.is_resource_duplicated(&key) {
                debug!(event_id = event.event_id, version = event.version, "skip already reapplied event");
                duplicates += 1;
                continue;
            }
            // A branch listing the same event twice still yields one append.
            if !batch_keys.insert(key) {
                duplicates += 1;
                continue;
            }
            candidates.push(event);
        }
        self.metrics.record_duplicates(duplicates);
        Ok(candidates)
    }

    fn apply_all(
        &self,
        ctx: &ReapplyContext,
        state: &mut dyn MutableState,
        candidates: &[&HistoryEvent],
        run_id: &str,
    ) -> Result<(), ReapplyError> {
        for (applied, event) in candidates.iter().enumerate() {
            if ctx.is_cancelled() {
                warn!(applied, remaining = candidates.len() - applied, "reapplication cancelled");
                self.metrics.record_reapplied(applied);
                self.metrics.record_call(results::CANCELLED);
                return Err(ReapplyError::Cancelled { applied });
            }
            let Some(signal) = event.signal_attributes() else {
                // Filtering rejects these before any append.
                return Err(ReapplyError::MalformedEvent {
                    event_id: event.event_id,
                    version: event.version,
                });
            };
            if let Err(err) = state.add_signal(
                &signal.signal_name,
                &signal.input,
                &signal.identity,
                &signal.header,
            ) {
                warn!(event_id = event.event_id, applied, error = %err, "failed to append reapplied signal");
                self.metrics.record_reapplied(applied);
                self.metrics.record_call(results::FAILED);
                return Err(err.into());
            }
            state.record_duplicated_resource(DedupKey::event_reapplied(run_id, event));
        }
        self.metrics.record_reapplied(candidates.len());
        Ok(())
    }

    fn schedule_if_needed(&self, state: &mut dyn MutableState) -> Result<(), ReapplyError> {
        if state.is_pending_first_task_backoff() {
            // The execution's own start sequence creates the first task.
            debug!("first task backoff pending, not scheduling");
            return Ok(());
        }
        if state.has_pending_task() {
            return Ok(());
        }
        if let Err(err) = state.schedule_task() {
            warn!(error = %err, "failed to schedule task after reapplication");
            self.metrics.record_call(results::FAILED);
            return Err(err.into());
        }
        self.metrics.record_task_scheduled();
        Ok(())
    }
}

impl EventsReapplier for Reapplier {
    fn reapply_events(
        &self,
        ctx: &ReapplyContext,
        state: &mut dyn MutableState,
        events: &[HistoryEvent],
        run_id: &str,
    ) -> Result<Vec<HistoryEvent>, ReapplyError> {
        let span = info_span!("reapply_events", run_id, input = events.len());
        let _guard = span.enter();

        let candidates = match self.filter_events(state, events, run_id) {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(error = %err, "rejecting malformed branch events");
                self.metrics.record_call(results::MALFORMED);
                return Err(err);
            }
        };
        if candidates.is_empty() {
            self.metrics.record_call(results::NOOP);
            return Ok(Vec::new());
        }

        if !state.is_running() {
            warn!(candidates = candidates.len(), "target execution is closed");
            self.metrics.record_call(results::CLOSED);
            return Err(ReapplyError::ClosedExecution {
                run_id: run_id.to_string(),
            });
        }

        self.apply_all(ctx, state, &candidates, run_id)?;
        self.schedule_if_needed(state)?;

        info!(reapplied = candidates.len(), "reapplied signals");
        self.metrics.record_call(results::APPLIED);
        Ok(candidates.into_iter().cloned().collect())
    }
}
