//! Escalation integration tests.
//!
//! These tests verify that blocked tasks are re-delegated along the
//! owner's declared escalation targets, that judgment calls leave a
//! decision behind, and that dead ends stay visible to the coordinator.

use commander::{DecisionStatus, DelegationEvent, Error, TaskPatch, TaskStatus, TaskTransition};

use crate::fixtures::{manual_escalation, started, TestWorkspace};

fn block(author: &str, reason: &str) -> TaskPatch {
    TaskPatch::new(author)
        .transition(TaskTransition::Block)
        .blocker(reason)
}

/// Test: No eligible target leaves the task blocked
/// Given a task owned by picky, whose only target never matches
/// When the worker reports a blocker and escalation is attempted
/// Then the task stays blocked and shows up in the blocked list
#[tokio::test]
async fn test_dead_end_stays_blocked() {
    let ws = TestWorkspace::new();
    let coordinator = ws.coordinator_with(manual_escalation());
    let id = started(&coordinator, "Tune the p pipeline", &["p"]).await;

    let task = coordinator.update(&id, block("picky", "needs input")).await.unwrap();
    assert_eq!(task.status, TaskStatus::Blocked);

    let err = coordinator.escalate(&id).await.unwrap_err();
    assert!(matches!(err, Error::NoEscalationTarget { ref worker, .. } if worker == "picky"));
    assert_eq!(err.kind(), "no_escalation_target");

    let blocked = coordinator.list(Some(TaskStatus::Blocked)).await.unwrap();
    assert_eq!(blocked.len(), 1);
    assert_eq!(blocked[0].id, id);
    assert_eq!(blocked[0].owner_worker, "picky");
    assert_eq!(blocked[0].blocker.as_deref(), Some("needs input"));
}

/// Test: Auto-escalation reports dead ends instead of failing the update
#[tokio::test]
async fn test_auto_escalation_dead_end_notifies_coordinator() {
    let ws = TestWorkspace::new();
    let mut coordinator = ws.coordinator();
    let mut events = coordinator.subscribe().unwrap();
    let id = started(&coordinator, "Ship solo work", &["solo"]).await;

    let task = coordinator.update(&id, block("solo", "out of ideas")).await.unwrap();
    assert_eq!(task.status, TaskStatus::Blocked);

    assert!(matches!(events.recv().await, Some(DelegationEvent::Delegated { .. })));
    match events.recv().await.unwrap() {
        DelegationEvent::NeedsIntervention { task_id, worker, reason } => {
            assert_eq!(task_id, id);
            assert_eq!(worker, "solo");
            assert_eq!(reason.as_deref(), Some("out of ideas"));
        }
        other => panic!("unexpected event {:?}", other),
    }
}

/// Test: Tied targets are a judgment call
/// Given w1 escalates to lead then w2, each matching one of [x, y]
/// When a w1 task blocks
/// Then it goes to lead (declared first) and an accepted decision names w2
#[tokio::test]
async fn test_tied_targets_record_decision() {
    let ws = TestWorkspace::new();
    let coordinator = ws.coordinator();
    let id = started(&coordinator, "Review the auth flow", &["x", "y"]).await;

    let task = coordinator.update(&id, block("w1", "design unclear")).await.unwrap();
    assert_eq!(task.status, TaskStatus::Delegated);
    assert_eq!(task.owner_worker, "lead");
    assert_eq!(task.owner_history, vec!["w1", "lead"]);
    assert!(task.blocker.is_none());

    let note = &task.last_log().unwrap().note;
    assert!(note.starts_with("escalated from w1 to lead (matched: y)"));
    assert!(note.contains("cause: design unclear"));
    assert!(note.contains("review.md"));

    let decisions = coordinator.decisions().await.unwrap();
    assert_eq!(decisions.len(), 1);
    let decision = &decisions[0];
    assert_eq!(decision.status, DecisionStatus::Accepted);
    assert_eq!(decision.task_ref.as_ref(), Some(&id));
    assert_eq!(decision.alternatives, "- w2");
    assert!(note.contains(decision.id.as_str()));
}

/// Test: A single eligible target needs no decision
#[tokio::test]
async fn test_single_target_escalation() {
    let ws = TestWorkspace::new();
    let coordinator = ws.coordinator_with(manual_escalation());
    let id = started(&coordinator, "Implement the parser", &["x"]).await;

    coordinator.update(&id, block("w1", "stuck")).await.unwrap();
    let escalated = coordinator.escalate(&id).await.unwrap();
    assert_eq!(escalated, id);

    let task = coordinator.status(&id).await.unwrap();
    assert_eq!(task.owner_worker, "w2");
    assert_eq!(task.status, TaskStatus::Delegated);
    assert!(coordinator.decisions().await.unwrap().is_empty());
}

/// Test: Escalation never hands a task back to a previous owner
#[tokio::test]
async fn test_escalation_chain_ends_at_previous_owners() {
    let ws = TestWorkspace::new();
    let coordinator = ws.coordinator_with(manual_escalation());
    let id = started(&coordinator, "Implement the parser", &["x"]).await;

    coordinator.update(&id, block("w1", "stuck")).await.unwrap();
    coordinator.escalate(&id).await.unwrap();
    coordinator
        .update(&id, TaskPatch::new("w2").transition(TaskTransition::Accept))
        .await
        .unwrap();
    coordinator.update(&id, block("w2", "also stuck")).await.unwrap();

    // w2 declares no escalation targets
    assert!(matches!(
        coordinator.escalate(&id).await,
        Err(Error::NoEscalationTarget { .. })
    ));

    let task = coordinator
        .update(&id, TaskPatch::new("operator").transition(TaskTransition::Abandon))
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
}

/// Test: Stale tasks can be force-escalated
#[tokio::test]
async fn test_force_escalation_of_stale_work() {
    let ws = TestWorkspace::new();
    let coordinator = ws.coordinator();
    let id = started(&coordinator, "Implement the parser", &["x"]).await;

    let task = coordinator.force_escalate(&id, "no report since Monday").await.unwrap();
    assert_eq!(task.owner_worker, "w2");
    assert!(task
        .log_entries
        .iter()
        .any(|e| e.note.contains("blocker: no report since Monday")));
    assert!(task
        .last_log()
        .unwrap()
        .note
        .contains("cause: no report since Monday"));
}

/// Test: Only blocked tasks can be escalated
#[tokio::test]
async fn test_escalating_active_task_is_invalid() {
    let ws = TestWorkspace::new();
    let coordinator = ws.coordinator();
    let id = started(&coordinator, "Implement the parser", &["x"]).await;

    let err = coordinator.escalate(&id).await.unwrap_err();
    assert!(matches!(err, Error::InvalidTransition { .. }));
    assert_eq!(
        coordinator.status(&id).await.unwrap().status,
        TaskStatus::InProgress
    );
}

/// Test: Idle work is reported as stale
#[tokio::test]
async fn test_stale_tasks_are_listed() {
    let ws = TestWorkspace::new();
    let coordinator = ws.coordinator_with(commander::config::EngineConfig {
        stale_after_secs: 0,
        ..manual_escalation()
    });
    let active = started(&coordinator, "Implement the parser", &["x"]).await;
    let parked = started(&coordinator, "Tune the p pipeline", &["p"]).await;
    coordinator.update(&parked, block("picky", "waiting")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let stale = coordinator.stale().await.unwrap();
    let ids: Vec<_> = stale.iter().map(|t| t.id.clone()).collect();
    assert_eq!(ids, vec![active.clone()]);

    let task = coordinator.force_escalate(&active, "idle").await.unwrap();
    assert_eq!(task.status, TaskStatus::Delegated);
    assert_eq!(task.owner_worker, "w2");
}
