//! Integration tests for history_reapply_runtime.
//!
//! All tests use temporary directories for isolation.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use history_reapply::metrics::ReapplyMetrics;
use history_reapply::{
    CancellationFlag, EventAttributes, EventType, ExecutionState, ExecutionStatus, Header,
    HistoryEvent, MutableState, ReapplyContext, ReapplyError, Reapplier, SignalAttributes,
};

use history_reapply_runtime::event_store::EventStore;
use history_reapply_runtime::fixture::load_scenarios;
use history_reapply_runtime::{logging, replay, snapshot};
use history_reapply_runtime::{ExecutionSession, RuntimeConfig, RuntimeError, SharedSession};

fn signal(event_id: i64, version: i64, name: &str) -> HistoryEvent {
    HistoryEvent::signaled(
        event_id,
        version,
        SignalAttributes {
            signal_name: name.to_string(),
            input: name.as_bytes().to_vec(),
            identity: "east".to_string(),
            header: Header::new(),
        },
    )
}

fn timer(event_id: i64) -> HistoryEvent {
    HistoryEvent::new(
        event_id,
        1,
        EventType::TimerFired,
        EventAttributes::Timer {
            timer_id: format!("t{event_id}"),
        },
    )
}

fn config_in(dir: &Path, snapshot_interval: u64) -> RuntimeConfig {
    RuntimeConfig {
        data_dir: dir.to_path_buf(),
        snapshot_interval,
        metrics_enabled: false,
        ..RuntimeConfig::default()
    }
}

/// Running execution whose first task is already processed.
fn idle_session(config: &RuntimeConfig, run_id: &str) -> ExecutionSession {
    let mut session = ExecutionSession::create(config, run_id, 1, 0).unwrap();
    session.start_pending_task().unwrap();
    session.complete_pending_task().unwrap();
    session
}

fn ids(events: &[HistoryEvent]) -> Vec<i64> {
    events.iter().map(|e| e.event_id).collect()
}

fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("..")
        .join("history_reapply")
        .join("tests")
        .join("fixtures")
        .join("branch_scenarios.json")
}

#[test]
fn event_store_reopens_at_last_event() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.log");
    let state = ExecutionState::start("r1", 1, 0).unwrap();

    {
        let mut store = EventStore::open(&path).unwrap();
        store.append_events(&state.history).unwrap();
        store.append_event(&signal(3, 1, "a")).unwrap();
    }

    let store = EventStore::open(&path).unwrap();
    assert_eq!(store.last_event_id(), 3);
    let events = store.load_all_events().unwrap();
    assert_eq!(ids(&events), vec![1, 2, 3]);
    assert_eq!(events[2], signal(3, 1, "a"));
    assert_eq!(ids(&store.load_events_after(2).unwrap()), vec![3]);
}

#[test]
fn event_store_rejects_gaps_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.log");
    let mut store = EventStore::open(&path).unwrap();
    store
        .append_events(&ExecutionState::start("r1", 1, 60).unwrap().history)
        .unwrap();

    let err = store
        .append_events(&[signal(2, 1, "a"), signal(4, 1, "b")])
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::SequenceViolation {
            expected: 3,
            got: 4
        }
    ));
    assert_eq!(store.last_event_id(), 1);
    assert_eq!(store.load_all_events().unwrap().len(), 1);
}

#[test]
fn truncated_frame_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.log");
    {
        let mut store = EventStore::open(&path).unwrap();
        store
            .append_events(&ExecutionState::start("r1", 1, 0).unwrap().history)
            .unwrap();
    }
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[10, 0, 0, 0, 1, 2]).unwrap();
    drop(file);

    assert!(matches!(
        EventStore::open(&path),
        Err(RuntimeError::CorruptLog { .. })
    ));
}

#[test]
fn replay_from_log_matches_session() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), 0);
    let mut session = idle_session(&config, "r1");
    session
        .reapply(&ReapplyContext::background(), &[signal(5, 1, "a"), timer(6)])
        .unwrap();

    session.verify_against_log().unwrap();

    let store = EventStore::open(&session.dir().join("events.log")).unwrap();
    let events = store.load_all_events().unwrap();
    let hash = replay::verify_determinism("r1", &events).unwrap();
    let (rebuilt, _) = replay::rebuild_state("r1", &events).unwrap();
    assert_eq!(rebuilt.history, session.state().history);
    assert_eq!(hash.len(), 64);
}

#[test]
fn reapply_survives_reopen_without_double_application() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), 0);
    let branch = vec![signal(5, 1, "a"), timer(6), signal(7, 1, "b")];

    let hash_before_reopen = {
        let mut session = idle_session(&config, "r1");
        let applied = session.reapply(&ReapplyContext::background(), &branch).unwrap();
        assert_eq!(ids(&applied), vec![5, 7]);
        assert_eq!(session.state().last_event_id(), 7);
        session.current_hash()
    };

    let mut reopened = ExecutionSession::open(&config, "r1").unwrap();
    assert_eq!(reopened.current_hash(), hash_before_reopen);
    assert_eq!(reopened.state().dedup_resources.len(), 2);

    let again = reopened.reapply(&ReapplyContext::background(), &branch).unwrap();
    assert!(again.is_empty());
    assert_eq!(reopened.current_hash(), hash_before_reopen);
    assert_eq!(
        EventStore::open(&reopened.dir().join("events.log"))
            .unwrap()
            .last_event_id(),
        7
    );
}

#[test]
fn open_without_snapshots_replays_full_log() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), 0);
    let history = idle_session(&config, "r1").state().history.clone();

    let reopened = ExecutionSession::open(&config, "r1").unwrap();
    assert_eq!(reopened.state().history, history);
    assert!(!reopened.state().has_pending_task());
}

#[test]
fn invalid_newest_snapshot_falls_back_to_older_one() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), 1);
    let ctx = ReapplyContext::background();

    let snapshots_dir = {
        let mut session = ExecutionSession::create(&config, "r1", 1, 0).unwrap();
        session.reapply(&ctx, &[signal(10, 1, "a")]).unwrap();
        session.reapply(&ctx, &[signal(11, 1, "b")]).unwrap();
        session.dir().join("snapshots")
    };

    let listed = snapshot::list_snapshots(&snapshots_dir).unwrap();
    assert_eq!(listed.len(), 3);
    fs::write(&listed[0], "{").unwrap();

    let mut reopened = ExecutionSession::open(&config, "r1").unwrap();
    assert_eq!(reopened.state().last_event_id(), 4);
    assert_eq!(reopened.state().dedup_resources.len(), 2);

    let again = reopened.reapply(&ctx, &[signal(11, 1, "b")]).unwrap();
    assert!(again.is_empty());
    assert_eq!(reopened.state().last_event_id(), 4);
    reopened.verify_against_log().unwrap();
}

#[test]
fn failed_snapshot_does_not_lose_dedup_resources() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), 1);
    let ctx = ReapplyContext::background();
    let branch = vec![signal(5, 1, "a"), signal(7, 1, "b")];

    let snapshots_dir = {
        let mut session = idle_session(&config, "r1");
        let snapshots_dir = session.dir().join("snapshots");
        fs::remove_dir_all(&snapshots_dir).unwrap();
        fs::write(&snapshots_dir, "not a directory").unwrap();

        let applied = session.reapply(&ctx, &branch).unwrap();
        assert_eq!(ids(&applied), vec![5, 7]);
        snapshots_dir
    };
    fs::remove_file(&snapshots_dir).unwrap();

    let mut reopened = ExecutionSession::open(&config, "r1").unwrap();
    assert_eq!(reopened.state().dedup_resources.len(), 2);
    assert_eq!(reopened.state().signal_count, 2);

    let again = reopened.reapply(&ctx, &branch).unwrap();
    assert!(again.is_empty());
    assert_eq!(reopened.state().signal_count, 2);
    assert_eq!(reopened.state().last_event_id(), 7);
}

#[test]
fn event_store_keeps_dedup_records_with_their_batch() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.log");
    let state = ExecutionState::start("r1", 1, 0).unwrap();
    let resource = "0::r1::9::1".to_string();

    {
        let mut store = EventStore::open(&path).unwrap();
        store.append_events(&state.history).unwrap();
        store
            .append_batch(&[signal(3, 1, "a")], std::slice::from_ref(&resource))
            .unwrap();
    }

    let contents = EventStore::open(&path).unwrap().load().unwrap();
    assert_eq!(ids(&contents.events), vec![1, 2, 3]);
    assert_eq!(contents.dedup_resources, vec![resource]);
}

#[test]
fn tampered_snapshot_fails_hash_check() {
    let dir = tempfile::tempdir().unwrap();
    let state = ExecutionState::start("r1", 1, 0).unwrap();
    let path = snapshot::save_snapshot(dir.path(), &state).unwrap();

    let mut snap = snapshot::load_snapshot(&path).unwrap();
    assert!(snapshot::verify_snapshot_hash(&snap));
    assert!(snap.verify().is_ok());

    snap.state.signal_count += 1;
    assert!(!snapshot::verify_snapshot_hash(&snap));
    assert!(snap.verify().is_err());
}

#[test]
fn cancelled_reapply_leaves_log_unchanged_and_retry_converges() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), 0);
    let mut session = idle_session(&config, "r1");
    let branch = vec![signal(5, 1, "a"), signal(6, 1, "b")];

    let flag = CancellationFlag::new();
    flag.cancel();
    let err = session
        .reapply(&ReapplyContext::with_cancellation(flag), &branch)
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Reapply(ReapplyError::Cancelled { applied: 0 })
    ));
    assert_eq!(session.state().last_event_id(), 4);

    let applied = session.reapply(&ReapplyContext::background(), &branch).unwrap();
    assert_eq!(ids(&applied), vec![5, 6]);
    session.verify_against_log().unwrap();
}

#[test]
fn closed_run_rejects_reapply() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), 0);
    let mut session = idle_session(&config, "r1");
    session.close(ExecutionStatus::Completed).unwrap();
    let hash = session.current_hash();

    let err = session
        .reapply(&ReapplyContext::background(), &[signal(5, 1, "late")])
        .unwrap_err();
    assert!(matches!(
        err,
        RuntimeError::Reapply(ReapplyError::ClosedExecution { .. })
    ));
    assert_eq!(session.current_hash(), hash);
}

#[test]
fn create_refuses_existing_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), 0);
    let _session = ExecutionSession::create(&config, "r1", 1, 0).unwrap();
    assert!(matches!(
        ExecutionSession::create(&config, "r1", 1, 0),
        Err(RuntimeError::RunExists { .. })
    ));
}

#[test]
fn version_bump_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), 0);
    {
        let mut session = idle_session(&config, "r1");
        session.set_current_version(9).unwrap();
    }
    let mut reopened = ExecutionSession::open(&config, "r1").unwrap();
    let applied = reopened
        .reapply(&ReapplyContext::background(), &[signal(5, 1, "a")])
        .unwrap();
    assert_eq!(applied.len(), 1);
    assert_eq!(reopened.state().history[4].version, 9);
}

#[test]
fn shared_session_applies_concurrent_branches_once() {
    logging::init_test_logging();
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), 0);
    let shared = SharedSession::new(idle_session(&config, "r1"));
    let branch = vec![signal(5, 1, "a"), signal(6, 1, "b")];

    let applied: usize = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| s.spawn(|| shared.reapply(&ReapplyContext::background(), &branch).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap().len()).sum()
    });

    assert_eq!(applied, 2);
    shared
        .with_lease(|session| {
            assert_eq!(session.state().signal_count, 2);
            session.verify_against_log()
        })
        .unwrap();
}

#[test]
fn kernel_fixtures_pass() {
    let scenarios = load_scenarios(&fixture_path()).unwrap();
    assert!(!scenarios.is_empty());
    let reapplier = Reapplier::new(ReapplyMetrics::disabled());
    for scenario in &scenarios {
        let report = scenario.run(&reapplier).unwrap();
        assert!(report.passed(), "{}: {:?}", report.name, report.failures);
    }
}

#[test]
fn snapshot_interval_counts_persisted_events() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), 2);
    let session = ExecutionSession::create(&config, "r1", 1, 0).unwrap();

    let listed = snapshot::list_snapshots(&session.dir().join("snapshots")).unwrap();
    assert_eq!(listed.len(), 1);
    let snap = snapshot::load_snapshot(&listed[0]).unwrap();
    assert_eq!(snap.last_event_id, 2);
}
