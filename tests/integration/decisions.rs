//! Decision log integration tests.

use std::fs;

use commander::{describe_error, Decision, DecisionId, DecisionStatus, Error};

use crate::fixtures::{started, TestWorkspace};

fn adr(title: &str) -> Decision {
    Decision::new(title)
        .with_context("We need a message broker.")
        .with_rationale("Operational familiarity.")
        .with_alternatives("- Kafka\n- NATS")
        .with_consequences("One more service to run.")
}

/// Test: Supersession chain
/// Given decision A accepted and decision B recorded
/// When A is superseded by B
/// Then A reads back superseded and points at B, and B is untouched
#[tokio::test]
async fn test_supersede_links_decisions() {
    let ws = TestWorkspace::new();
    let coordinator = ws.coordinator();

    let a = coordinator
        .record_decision(adr("Use RabbitMQ").with_status(DecisionStatus::Accepted))
        .await
        .unwrap();
    let b = coordinator.record_decision(adr("Use NATS")).await.unwrap();

    coordinator.supersede(&a, &b).await.unwrap();

    let old = coordinator.decision(&a).await.unwrap();
    assert_eq!(old.status, DecisionStatus::Superseded);
    assert_eq!(old.superseded_by.as_ref(), Some(&b));
    assert_eq!(old.rationale, "Operational familiarity.");

    let new = coordinator.decision(&b).await.unwrap();
    assert_eq!(new.status, DecisionStatus::Proposed);
    assert!(new.superseded_by.is_none());

    let c = coordinator.record_decision(adr("Use Kafka")).await.unwrap();
    let err = coordinator.supersede(&a, &c).await.unwrap_err();
    assert!(matches!(&err, Error::AlreadySuperseded { by, .. } if by == b.as_str()));
    assert_eq!(err.kind(), "already_superseded");
    assert_eq!(
        coordinator.decision(&a).await.unwrap().superseded_by,
        Some(b)
    );
}

/// Test: Illegal direct status edits
/// Given an accepted decision
/// When an operator sets it to deprecated
/// Then InvalidDecisionTransition is returned and the status is unchanged
#[tokio::test]
async fn test_direct_deprecation_is_rejected() {
    let ws = TestWorkspace::new();
    let coordinator = ws.coordinator();
    let id = coordinator.record_decision(adr("Use RabbitMQ")).await.unwrap();

    let accepted = coordinator
        .set_decision_status(&id, DecisionStatus::Accepted)
        .await
        .unwrap();
    assert_eq!(accepted.status, DecisionStatus::Accepted);

    for status in [
        DecisionStatus::Deprecated,
        DecisionStatus::Superseded,
        DecisionStatus::Proposed,
    ] {
        let err = coordinator.set_decision_status(&id, status).await.unwrap_err();
        assert!(matches!(err, Error::InvalidDecisionTransition { .. }));
        assert_eq!(err.kind(), "invalid_transition");
        assert!(describe_error(&err).contains("supersede"));
    }
    assert_eq!(
        coordinator.decision(&id).await.unwrap().status,
        DecisionStatus::Accepted
    );
}

/// Test: Unknown ids are reported as not found
#[tokio::test]
async fn test_missing_decisions() {
    let ws = TestWorkspace::new();
    let coordinator = ws.coordinator();
    let known = coordinator.record_decision(adr("Use RabbitMQ")).await.unwrap();
    let missing = DecisionId::new();

    assert!(matches!(
        coordinator.decision(&missing).await,
        Err(Error::DecisionNotFound(_))
    ));
    assert!(matches!(
        coordinator.supersede(&known, &missing).await,
        Err(Error::DecisionNotFound(_))
    ));
    assert!(matches!(
        coordinator.supersede(&missing, &known).await,
        Err(Error::DecisionNotFound(_))
    ));
    assert_eq!(
        coordinator.decision(&known).await.unwrap().status,
        DecisionStatus::Proposed
    );
}

/// Test: Decisions can point at the task they were made for
#[tokio::test]
async fn test_decision_for_task() {
    let ws = TestWorkspace::new();
    let coordinator = ws.coordinator();
    let task = started(&coordinator, "Implement the parser", &["x"]).await;

    let id = coordinator
        .record_decision(adr("Parse with a hand-written lexer").for_task(&task))
        .await
        .unwrap();

    let decision = coordinator.decision(&id).await.unwrap();
    assert_eq!(decision.task_ref, Some(task));

    let listed = coordinator.decisions().await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0], decision);
}

/// Test: Decision records read like an ADR
#[tokio::test]
async fn test_decision_record_layout() {
    let ws = TestWorkspace::new();
    let coordinator = ws.coordinator();
    let id = coordinator
        .record_decision(adr("  Use RabbitMQ  "))
        .await
        .unwrap();

    let path = ws
        .path
        .join(".commander/decisions")
        .join(format!("{}.md", id));
    let text = fs::read_to_string(path).unwrap();
    assert!(text.starts_with("+++\n"));
    assert!(text.contains("status = \"proposed\""));
    assert!(text.contains("# Use RabbitMQ\n"));
    for heading in ["## Context", "## Rationale", "## Alternatives", "## Consequences"] {
        assert!(text.contains(heading), "missing {}", heading);
    }
    assert!(text.contains("- Kafka\n- NATS"));
}

/// Test: Markdown headings inside a section do not split it
#[tokio::test]
async fn test_section_text_with_headings_reads_back() {
    let ws = TestWorkspace::new();
    let coordinator = ws.coordinator();
    let decision = Decision::new("Pick a broker")
        .with_context("notes:\n## Rationale\nold idea")
        .with_rationale("real why");
    let id = coordinator.record_decision(decision).await.unwrap();

    let stored = coordinator.decision(&id).await.unwrap();
    assert_eq!(stored.context, "notes:\n## Rationale\nold idea");
    assert_eq!(stored.rationale, "real why");
}
