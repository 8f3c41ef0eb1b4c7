//! Per-run sessions with persist-after-apply semantics.
//!
//! Each run gets its own directory:
//!   <data_dir>/<run_id>/events.log
//!   <data_dir>/<run_id>/snapshots/
//!
//! Mutation order for every operation:
//!   1. mutate the in-memory `ExecutionState` through the kernel
//!   2. append the events it produced, and the dedup resources it
//!      recorded, to the history log as one fsynced batch
//!   3. snapshot if the interval is reached
//!
//! Step 2 runs even when step 1 fails halfway, so the log never lags
//! behind events a caller may already have observed. The log alone
//! rebuilds the run; snapshots only shorten replay.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use history_reapply::hashing::canonical_hash;
use history_reapply::metrics::ReapplyMetrics;
use history_reapply::{
    EventsReapplier, ExecutionState, ExecutionStatus, HistoryEvent, ReapplyContext, Reapplier,
    StateError,
};

use crate::config::RuntimeConfig;
use crate::error::RuntimeError;
use crate::event_store::EventStore;
use crate::replay;
use crate::snapshot;

const EVENTS_FILE: &str = "events.log";
const SNAPSHOTS_DIR: &str = "snapshots";

/// One run's state, history log and snapshots. Single writer.
pub struct ExecutionSession {
    run_id: String,
    dir: PathBuf,
    state: ExecutionState,
    store: EventStore,
    reapplier: Reapplier,
    snapshot_interval: u64,
    events_since_snapshot: u64,
}

impl ExecutionSession {
    /// Start a new run and persist its first events.
    pub fn create(
        config: &RuntimeConfig,
        run_id: &str,
        version: i64,
        first_task_backoff_secs: u64,
    ) -> Result<Self, RuntimeError> {
        let dir = config.run_dir(run_id);
        let store = EventStore::open(&dir.join(EVENTS_FILE))?;
        if store.last_event_id() > 0 {
            return Err(RuntimeError::RunExists {
                run_id: run_id.to_string(),
            });
        }

        let state = ExecutionState::start(run_id, version, first_task_backoff_secs)?;
        let mut session = Self::assemble(config, run_id, dir, state, store);
        session.persist(0, &[])?;
        tracing::info!(run_id, version, first_task_backoff_secs, "execution created");
        Ok(session)
    }

    /// Reopen an existing run: latest valid snapshot, then the log tail.
    pub fn open(config: &RuntimeConfig, run_id: &str) -> Result<Self, RuntimeError> {
        let dir = config.run_dir(run_id);
        let store = EventStore::open(&dir.join(EVENTS_FILE))?;
        let logged = store.last_event_id();

        let snap = snapshot::load_latest_valid_snapshot(&dir.join(SNAPSHOTS_DIR))?
            .filter(|snap| snap.state.run_id == run_id);

        let state = match snap {
            Some(snap) if snap.last_event_id > logged => {
                return Err(RuntimeError::CorruptLog {
                    path: store.path().display().to_string(),
                    reason: format!(
                        "log ends at event {logged} but snapshot covers event {}",
                        snap.last_event_id
                    ),
                });
            }
            Some(snap) => {
                let log = store.load()?;
                let tail: Vec<HistoryEvent> = log
                    .events
                    .into_iter()
                    .filter(|e| e.event_id > snap.last_event_id)
                    .collect();
                tracing::debug!(
                    run_id,
                    snapshot_event_id = snap.last_event_id,
                    tail = tail.len(),
                    "restoring from snapshot"
                );
                replay::replay_onto(snap.state, &tail, &log.dedup_resources)?
            }
            None => {
                let log = store.load()?;
                tracing::debug!(run_id, events = log.events.len(), "full replay");
                replay::rebuild_from_log(run_id, &log)?
            }
        };

        Ok(Self::assemble(config, run_id, dir, state, store))
    }

    fn assemble(
        config: &RuntimeConfig,
        run_id: &str,
        dir: PathBuf,
        state: ExecutionState,
        store: EventStore,
    ) -> Self {
        let metrics = if config.metrics_enabled {
            ReapplyMetrics::new()
        } else {
            ReapplyMetrics::disabled()
        };
        Self {
            run_id: run_id.to_string(),
            dir,
            state,
            store,
            reapplier: Reapplier::new(metrics),
            snapshot_interval: config.snapshot_interval,
            events_since_snapshot: 0,
        }
    }

    /// Reapply branch events to this run and persist the outcome.
    ///
    /// Events appended before a failure are still written to the log
    /// together with their dedup resources, so a retry only applies the rest.
    pub fn reapply(
        &mut self,
        ctx: &ReapplyContext,
        events: &[HistoryEvent],
    ) -> Result<Vec<HistoryEvent>, RuntimeError> {
        let mark = self.state.last_event_id();
        let dedup_before = self.state.dedup_resources.clone();

        let result = self
            .reapplier
            .reapply_events(ctx, &mut self.state, events, &self.run_id);

        let recorded: Vec<String> = self
            .state
            .dedup_resources
            .difference(&dedup_before)
            .cloned()
            .collect();
        self.persist(mark, &recorded)?;
        Ok(result?)
    }

    pub fn fire_first_task_backoff(&mut self) -> Result<HistoryEvent, RuntimeError> {
        self.record(ExecutionState::fire_first_task_backoff)
    }

    pub fn start_pending_task(&mut self) -> Result<HistoryEvent, RuntimeError> {
        self.record(ExecutionState::start_pending_task)
    }

    pub fn complete_pending_task(&mut self) -> Result<HistoryEvent, RuntimeError> {
        self.record(ExecutionState::complete_pending_task)
    }

    pub fn close(&mut self, status: ExecutionStatus) -> Result<HistoryEvent, RuntimeError> {
        self.record(|state| state.close(status))
    }

    /// Version bumps are not history events, so they are snapshotted.
    pub fn set_current_version(&mut self, version: i64) -> Result<(), RuntimeError> {
        self.state.set_current_version(version);
        self.take_snapshot()
    }

    fn record(
        &mut self,
        op: impl FnOnce(&mut ExecutionState) -> Result<HistoryEvent, StateError>,
    ) -> Result<HistoryEvent, RuntimeError> {
        let mark = self.state.last_event_id();
        let result = op(&mut self.state);
        self.persist(mark, &[])?;
        Ok(result?)
    }

    fn persist(&mut self, mark: i64, dedup_resources: &[String]) -> Result<(), RuntimeError> {
        let appended = self.state.history_after(mark);
        self.store.append_batch(appended, dedup_resources)?;
        self.events_since_snapshot += appended.len() as u64;

        let interval_reached =
            self.snapshot_interval > 0 && self.events_since_snapshot >= self.snapshot_interval;
        if interval_reached {
            // The batch is already durable; a failed snapshot is retried at
            // the next interval.
            if let Err(err) = self.take_snapshot() {
                tracing::warn!(run_id = %self.run_id, error = %err, "snapshot failed");
            }
        }
        Ok(())
    }

    fn take_snapshot(&mut self) -> Result<(), RuntimeError> {
        let path = snapshot::save_snapshot(&self.dir.join(SNAPSHOTS_DIR), &self.state)?;
        tracing::debug!(run_id = %self.run_id, path = %path.display(), "snapshot saved");
        self.events_since_snapshot = 0;
        Ok(())
    }

    /// Rebuild from the log alone and check it against memory.
    ///
    /// Version bumps live only in snapshots, so the current version is
    /// taken from memory.
    pub fn verify_against_log(&self) -> Result<String, RuntimeError> {
        let log = self.store.load()?;
        let mut rebuilt = replay::rebuild_from_log(&self.run_id, &log)?;
        rebuilt.current_version = self.state.current_version;

        let expected = self.current_hash();
        let actual = canonical_hash(&rebuilt);
        if expected != actual {
            return Err(RuntimeError::Nondeterministic {
                first: expected,
                second: actual,
            });
        }
        Ok(actual)
    }

    pub fn state(&self) -> &ExecutionState {
        &self.state
    }

    pub fn current_hash(&self) -> String {
        canonical_hash(&self.state)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Thread-safe session handle. Holding the guard is the run's exclusive
/// lease: no two reapply calls on one run interleave.
pub struct SharedSession {
    run_id: String,
    inner: Mutex<ExecutionSession>,
}

impl SharedSession {
    pub fn new(session: ExecutionSession) -> Self {
        Self {
            run_id: session.run_id().to_string(),
            inner: Mutex::new(session),
        }
    }

    pub fn reapply(
        &self,
        ctx: &ReapplyContext,
        events: &[HistoryEvent],
    ) -> Result<Vec<HistoryEvent>, RuntimeError> {
        self.lock()?.reapply(ctx, events)
    }

    /// Run `f` with exclusive access to the session.
    pub fn with_lease<R>(
        &self,
        f: impl FnOnce(&mut ExecutionSession) -> Result<R, RuntimeError>,
    ) -> Result<R, RuntimeError> {
        let mut session = self.lock()?;
        f(&mut session)
    }

    pub fn current_hash(&self) -> Result<String, RuntimeError> {
        Ok(self.lock()?.current_hash())
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn lock(&self) -> Result<MutexGuard<'_, ExecutionSession>, RuntimeError> {
        self.inner.lock().map_err(|_| RuntimeError::LockPoisoned {
            run_id: self.run_id.clone(),
        })
    }
}
