//! Concurrent writer tests.
//!
//! These tests verify that simultaneous updates never lose a write:
//! every committed patch leaves exactly one log entry and one version bump,
//! and writers that lose the race are told so.

use std::sync::Arc;
use std::thread;

use chrono::Utc;
use futures::future::join_all;

use commander::config::EngineConfig;
use commander::ledger::TaskLedger;
use commander::{Error, Task, TaskId, TaskPatch};

use crate::fixtures::{started, TestWorkspace};

/// Test: Concurrent log appends are serialized
/// Given one in-progress task
/// When 8 writers append a note at the same time
/// Then each success is visible exactly once and versions match
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_updates_lose_nothing() {
    let ws = TestWorkspace::new();
    let coordinator = ws.coordinator_with(EngineConfig {
        max_update_attempts: 10,
        backoff_base_ms: 5,
        backoff_jitter_ms: 10,
        ..EngineConfig::default()
    });
    let id = started(&coordinator, "Implement the parser", &["x"]).await;
    let baseline = coordinator.status(&id).await.unwrap();

    let writers = (0..8).map(|n| {
        let patch = TaskPatch::new(&format!("writer-{}", n)).note(&format!("progress {}", n));
        coordinator.update(&id, patch)
    });
    let results = join_all(writers).await;

    let mut successes = 0;
    for result in &results {
        match result {
            Ok(_) => successes += 1,
            Err(Error::PersistentConflict { attempts, .. }) => assert_eq!(*attempts, 10),
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert!(successes >= 1);

    let task = coordinator.status(&id).await.unwrap();
    assert_eq!(task.version, baseline.version + successes as u64);
    assert_eq!(
        task.log_entries.len(),
        baseline.log_entries.len() + successes
    );
    for (n, result) in results.iter().enumerate() {
        let note = format!("progress {}", n);
        let logged = task.log_entries.iter().filter(|e| e.note == note).count();
        assert_eq!(logged, usize::from(result.is_ok()));
    }
}

/// Test: Two writers holding the same snapshot
/// Given two writers that read version v
/// When both commit against v
/// Then exactly one succeeds and the other gets a Conflict naming the new version
#[test]
fn test_stale_snapshot_is_rejected() {
    let ws = TestWorkspace::new();
    let ledger = TaskLedger::open(&ws.ledger_dir()).unwrap();
    let now = Utc::now();
    let task = Task::new(TaskId::at(now), "Race", "w1", vec!["x".into()], None, now);
    let id = ledger.create(&task).unwrap();
    let snapshot = ledger.get(&id).unwrap();

    let ledger = Arc::new(ledger);
    let handles: Vec<_> = (0..2)
        .map(|n| {
            let ledger = Arc::clone(&ledger);
            let id = id.clone();
            let version = snapshot.version;
            thread::spawn(move || {
                ledger.update(&id, version, |t| {
                    t.append_log(&format!("writer-{}", n), "claim", Utc::now());
                    Ok(())
                })
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let conflict = results.iter().find_map(|r| r.as_ref().err()).unwrap();
    match conflict {
        Error::Conflict {
            expected, found, ..
        } => {
            assert_eq!(*expected, snapshot.version);
            assert_eq!(*found, snapshot.version + 1);
        }
        other => panic!("expected conflict, got {}", other),
    }

    let stored = ledger.get(&id).unwrap();
    assert_eq!(stored.version, snapshot.version + 1);
    assert_eq!(stored.log_entries.len(), 1);
}

/// Test: Lock files do not show up as tasks
#[test]
fn test_lock_files_are_not_records() {
    let ws = TestWorkspace::new();
    let ledger = TaskLedger::open(&ws.ledger_dir()).unwrap();
    let now = Utc::now();
    let task = Task::new(TaskId::at(now), "Locked", "w1", vec![], None, now);
    let id = ledger.create(&task).unwrap();
    ledger
        .modify(&id, |t| {
            t.append_log("w1", "touch", Utc::now());
            Ok(())
        })
        .unwrap();

    assert!(ws.ledger_dir().join(".locks").is_dir());
    assert_eq!(ledger.list_all().unwrap().len(), 1);
}

/// Test: A report that cannot be written leaves the task readable
/// Given an in-progress task
/// When a report arrives from an author spanning two lines
/// Then it is refused and the task reads back as before
#[tokio::test]
async fn test_unwritable_author_is_refused() {
    let ws = TestWorkspace::new();
    let coordinator = ws.coordinator();
    let id = started(&coordinator, "Implement the parser", &["x"]).await;
    let before = coordinator.status(&id).await.unwrap();

    let err = coordinator
        .update(&id, TaskPatch::new("ops\nbot").note("hi"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidMutation { .. }));
    assert_eq!(err.kind(), "invalid_transition");
    assert_eq!(coordinator.status(&id).await.unwrap(), before);

    let task = coordinator
        .update(&id, TaskPatch::new("ops bot").note("line one\r\nline two"))
        .await
        .unwrap();
    assert_eq!(task.last_log().unwrap().note, "line one\nline two");
    assert_eq!(coordinator.status(&id).await.unwrap(), task);
}
