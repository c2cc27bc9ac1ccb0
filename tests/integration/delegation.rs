//! Delegation integration tests.
//!
//! These tests verify worker selection, the mandatory rationale log entry,
//! knowledge hand-off and nested delegation through the Coordinator.

use std::fs;

use commander::config::Config;
use commander::orchestration::ENGINE_AUTHOR;
use commander::{Coordinator, DelegationEvent, Error, TaskStatus};

use crate::fixtures::{file_names, tags, TestWorkspace};

/// Test: More matching tags wins, ties go to the smaller id
/// Given workers w1{x,y} and w2{x}
/// When delegating with [x] and with [x, y]
/// Then w1 is selected both times and the log entry says why
#[tokio::test]
async fn test_selects_best_ranked_worker() {
    let ws = TestWorkspace::new();
    let coordinator = ws.coordinator();

    let id = coordinator
        .delegate("Implement the parser", &tags(&["x"]), None)
        .await
        .unwrap();
    let task = coordinator.status(&id).await.unwrap();
    assert_eq!(task.owner_worker, "w1");
    assert_eq!(task.status, TaskStatus::Delegated);
    let rationale = &task.log_entries[0];
    assert_eq!(rationale.author, ENGINE_AUTHOR);
    assert!(
        rationale.note.starts_with("selected w1 (matched: x)"),
        "unexpected rationale: {}",
        rationale.note
    );
    assert!(rationale.note.contains("candidates: w1 (1), w2 (1)"));

    let id = coordinator
        .delegate("Implement the parser", &tags(&["X", "y"]), None)
        .await
        .unwrap();
    let task = coordinator.status(&id).await.unwrap();
    assert_eq!(task.owner_worker, "w1");
    assert!(task.log_entries[0].note.starts_with("selected w1 (matched: x, y)"));
}

/// Test: Unknown capability is surfaced
/// Given no worker declares tag z
/// When delegating with [z]
/// Then NoCapableWorker is returned and nothing is written
#[tokio::test]
async fn test_no_capable_worker() {
    let ws = TestWorkspace::new();
    let coordinator = ws.coordinator();

    let err = coordinator
        .delegate("Port to z", &tags(&["z"]), None)
        .await
        .unwrap_err();
    assert!(matches!(&err, Error::NoCapableWorker { tags } if tags == &vec!["z".to_string()]));
    assert_eq!(err.kind(), "no_capable_worker");
    assert!(coordinator.list(None).await.unwrap().is_empty());
}

/// Test: Knowledge documents travel with the hand-off
#[tokio::test]
async fn test_handoff_carries_knowledge() {
    let ws = TestWorkspace::new();
    let mut coordinator = ws.coordinator();
    let mut events = coordinator.subscribe().unwrap();

    let id = coordinator
        .delegate("Implement the auth flow", &tags(&["x"]), None)
        .await
        .unwrap();

    match events.recv().await.unwrap() {
        DelegationEvent::Delegated {
            task_id,
            worker,
            documents,
        } => {
            assert_eq!(task_id, id);
            assert_eq!(worker, "w1");
            assert_eq!(file_names(&documents), vec!["auth.md"]);
        }
        other => panic!("unexpected event {:?}", other),
    }

    let task = coordinator.status(&id).await.unwrap();
    assert!(task.log_entries[0].note.contains("auth.md"));

    let all = coordinator.documents("w1").unwrap();
    let paths: Vec<_> = all.iter().map(|d| d.path.clone()).collect();
    assert_eq!(file_names(&paths), vec!["auth.md", "style.md"]);
    assert!(all[0].read().unwrap().contains("# auth.md"));
}

/// Test: A missing knowledge base degrades gracefully
#[tokio::test]
async fn test_missing_kb_root_does_not_block_delegation() {
    let ws = TestWorkspace::new();
    let config = Config {
        kb_root: Some("no-such-kb".to_string()),
        ..Config::default()
    };
    let coordinator = Coordinator::with_config(&ws.path, config).unwrap();

    let id = coordinator
        .delegate("Implement the auth flow", &tags(&["x"]), None)
        .await
        .unwrap();
    let task = coordinator.status(&id).await.unwrap();
    assert!(task.log_entries[0].note.ends_with("knowledge: unavailable"));

    let err = coordinator.knowledge("w1", &tags(&["auth"])).unwrap_err();
    assert!(matches!(err, Error::KbUnavailable { .. }));
    assert!(matches!(
        coordinator.documents("w1"),
        Err(Error::KbUnavailable { .. })
    ));
}

/// Test: Sub-tasks stay within the parent owner's delegation targets
#[tokio::test]
async fn test_nested_delegation() {
    let ws = TestWorkspace::new();
    let coordinator = ws.coordinator();

    let parent = coordinator
        .delegate("Ship the feature", &tags(&["x", "y"]), None)
        .await
        .unwrap();
    let child = coordinator
        .delegate("Write the parser", &tags(&["x"]), Some(parent.clone()))
        .await
        .unwrap();

    let task = coordinator.status(&child).await.unwrap();
    assert_eq!(task.owner_worker, "w2");
    assert_eq!(task.coordinator_ref.as_ref(), Some(&parent));

    let children = coordinator.children(&parent).await.unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].id, child);
}

/// Test: Ledger records are plain, diffable text
#[tokio::test]
async fn test_record_is_human_readable() {
    let ws = TestWorkspace::new();
    let coordinator = ws.coordinator();
    let id = coordinator
        .delegate("Implement the parser", &tags(&["x"]), None)
        .await
        .unwrap();

    let text = fs::read_to_string(ws.task_file(&id)).unwrap();
    assert!(text.starts_with("+++\n"));
    assert!(text.contains("status = \"delegated\""));
    assert!(text.contains("owner_worker = \"w1\""));
    assert!(text.contains("# Implement the parser"));
    assert!(text.contains("## Log"));
    assert!(text.contains("**coordinator**: selected w1"));
}

/// Test: Reading a committed task returns exactly what was written
#[tokio::test]
async fn test_write_then_read_roundtrip() {
    let ws = TestWorkspace::new();
    let coordinator = ws.coordinator();
    let id = coordinator
        .delegate("Implement the parser", &tags(&["x"]), None)
        .await
        .unwrap();

    let first = coordinator.status(&id).await.unwrap();
    let reopened = ws.coordinator();
    let second = reopened.status(&id).await.unwrap();
    assert_eq!(first, second);
    assert!(second.updated_at >= second.created_at);
}
