//! Delegation engine: routes goals to workers and drives task lifecycles.
//!
//! The engine is the only component that retries. Ledger conflicts are
//! retried with jittered backoff up to `max_update_attempts`; every other
//! error is surfaced unchanged.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::core::{
    Decision, DecisionId, DecisionStatus, Task, TaskId, TaskPatch, TaskStatus, TaskTransition,
};
use crate::decisions::DecisionLog;
use crate::knowledge::{KnowledgeDocument, KnowledgeIndex};
use crate::ledger::TaskLedger;
use crate::orchestration::keywords::extract_keywords;
use crate::registry::{normalize_tags, Registry, Worker};
use crate::util::blocking;
use crate::{Error, Result};

/// Author recorded on log entries written by the engine itself.
pub const ENGINE_AUTHOR: &str = "coordinator";

/// Hand-off notifications for whatever executes tasks.
#[derive(Debug, Clone, PartialEq)]
pub enum DelegationEvent {
    /// A new task was assigned to a worker.
    Delegated {
        task_id: TaskId,
        worker: String,
        documents: Vec<PathBuf>,
    },
    /// A blocked task was re-delegated.
    Escalated {
        task_id: TaskId,
        from: String,
        to: String,
        decision: Option<DecisionId>,
    },
    /// A blocked task has no eligible escalation target.
    NeedsIntervention {
        task_id: TaskId,
        worker: String,
        reason: Option<String>,
    },
}

/// Outcome of choosing an escalation target for a blocked task.
#[derive(Debug, Clone, PartialEq)]
struct EscalationPlan {
    from: String,
    target: String,
    matched: Vec<String>,
    /// Other eligible targets with as many matching tags as `target`.
    tied: Vec<String>,
}

pub struct DelegationEngine {
    ledger: TaskLedger,
    registry: Arc<Registry>,
    knowledge: Arc<KnowledgeIndex>,
    decisions: DecisionLog,
    config: EngineConfig,
    events: mpsc::Sender<DelegationEvent>,
}

impl DelegationEngine {
    /// Build an engine and the receiving end of its event channel.
    pub fn new(
        ledger: TaskLedger,
        registry: Arc<Registry>,
        knowledge: Arc<KnowledgeIndex>,
        decisions: DecisionLog,
        config: EngineConfig,
    ) -> (Self, mpsc::Receiver<DelegationEvent>) {
        let (events, rx) = mpsc::channel(config.event_buffer.max(1));
        let engine = Self {
            ledger,
            registry,
            knowledge,
            decisions,
            config,
            events,
        };
        (engine, rx)
    }

    pub fn ledger(&self) -> &TaskLedger {
        &self.ledger
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn knowledge(&self) -> &KnowledgeIndex {
        &self.knowledge
    }

    pub fn decisions(&self) -> &DecisionLog {
        &self.decisions
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Assign `goal` to the best matching worker and return the new task id.
    ///
    /// The task is created with a log entry recording why the worker was
    /// chosen, moved to `delegated`, and announced on the event channel.
    /// Returns as soon as the hand-off is queued.
    pub async fn delegate(
        &self,
        goal: &str,
        preferred_tags: &[String],
        coordinator_ref: Option<TaskId>,
    ) -> Result<TaskId> {
        let ledger = self.ledger.clone();
        let registry = Arc::clone(&self.registry);
        let knowledge = Arc::clone(&self.knowledge);
        let goal = goal.trim().to_string();
        let tags: Vec<String> = normalize_tags(preferred_tags).into_iter().collect();

        let (task, documents) = blocking(move || {
            let scope = match &coordinator_ref {
                Some(parent) => delegation_scope(&ledger, &registry, parent)?,
                None => None,
            };
            let candidates: Vec<&Worker> = registry
                .find_by_capability(&tags)
                .into_iter()
                .filter(|w| scope.as_ref().map_or(true, |(_, allowed)| allowed.contains(&w.id)))
                .collect();
            let worker = *candidates
                .first()
                .ok_or_else(|| Error::NoCapableWorker { tags: tags.clone() })?;

            let keywords = extract_keywords(&goal, &tags);
            let (documents, kb_note) = guidance(&knowledge, &worker.id, &keywords);

            let wanted: BTreeSet<String> = tags.iter().cloned().collect();
            let ranking: Vec<String> = candidates
                .iter()
                .map(|w| format!("{} ({})", w.id, w.matching_tags(&wanted).len()))
                .collect();
            let mut note = format!(
                "selected {} (matched: {}); candidates: {}; knowledge: {}",
                worker.id,
                worker.matching_tags(&wanted).join(", "),
                ranking.join(", "),
                kb_note
            );
            if let Some((parent_owner, _)) = &scope {
                note.push_str(&format!("; within delegation targets of {}", parent_owner));
            }

            let now = Utc::now();
            let mut task = Task::new(TaskId::at(now), &goal, &worker.id, tags, coordinator_ref, now);
            task.append_log(ENGINE_AUTHOR, &note, now);
            ledger.create(&task)?;
            Ok((task, documents))
        })
        .await?;

        let id = task.id.clone();
        let ledger = self.ledger.clone();
        let target = id.clone();
        self.with_retry(&id, move || {
            ledger.modify(&target, |t| t.apply_transition(TaskTransition::Delegate))
        })
        .await?;

        info!(task = %id, worker = %task.owner_worker, documents = documents.len(), "task delegated");
        self.emit(DelegationEvent::Delegated {
            task_id: id.clone(),
            worker: task.owner_worker.clone(),
            documents: documents.into_iter().map(|d| d.path).collect(),
        });
        Ok(id)
    }

    pub async fn status(&self, id: &TaskId) -> Result<Task> {
        let ledger = self.ledger.clone();
        let id = id.clone();
        blocking(move || ledger.get(&id)).await
    }

    /// Apply a worker's report to a task.
    ///
    /// When the patch blocks the task and auto-escalation is enabled, the
    /// task is escalated right away. If no target is eligible the blocked
    /// task is returned and the coordinator is notified.
    pub async fn update(&self, id: &TaskId, patch: TaskPatch) -> Result<Task> {
        let ledger = self.ledger.clone();
        let target = id.clone();
        let blocks = patch.transition == Some(TaskTransition::Block);
        let task = self
            .with_retry(id, move || {
                ledger.modify(&target, |t| patch.apply_to(t, Utc::now()))
            })
            .await?;
        debug!(task = %id, status = %task.status, version = task.version, "task updated");

        if blocks && self.config.auto_escalate && task.status == TaskStatus::Blocked {
            return match self.escalate(id).await {
                Ok(escalated) => Ok(escalated),
                Err(Error::NoEscalationTarget { .. }) => self.status(id).await,
                Err(e) => Err(e),
            };
        }
        Ok(task)
    }

    /// Re-delegate a blocked task to its owner's first eligible
    /// escalation target.
    ///
    /// Targets are tried in declared order. A target is eligible when it
    /// shares at least one tag with the task's preferred tags and has not
    /// owned the task before. When several eligible targets tie on the
    /// chosen one's match count, the choice is recorded as a decision.
    pub async fn escalate(&self, id: &TaskId) -> Result<Task> {
        let ledger = self.ledger.clone();
        let registry = Arc::clone(&self.registry);
        let knowledge = Arc::clone(&self.knowledge);
        let target_id = id.clone();

        let attempt = self
            .with_retry(id, move || {
                let task = ledger.get(&target_id)?;
                if task.status != TaskStatus::Blocked {
                    return Err(Error::InvalidTransition {
                        id: task.id.to_string(),
                        from: task.status.to_string(),
                        to: TaskTransition::Escalate.target().to_string(),
                    });
                }
                let plan = plan_escalation(&registry, &task)?;
                let decision = judgment_call(&task, &plan);

                let keywords = extract_keywords(&task.title, &task.preferred_tags);
                let (documents, kb_note) = guidance(&knowledge, &plan.target, &keywords);
                let mut note = format!(
                    "escalated from {} to {} (matched: {}); cause: {}; knowledge: {}",
                    plan.from,
                    plan.target,
                    plan.matched.join(", "),
                    task.blocker.as_deref().unwrap_or("unspecified"),
                    kb_note
                );
                if let Some(decision) = &decision {
                    note.push_str(&format!("; decision: {}", decision.id));
                }

                let updated = ledger.update(&target_id, task.version, |t| {
                    t.apply_transition(TaskTransition::Escalate)?;
                    t.reassign(&plan.target);
                    t.append_log(ENGINE_AUTHOR, &note, Utc::now());
                    Ok(())
                })?;
                Ok((updated, plan, decision, documents))
            })
            .await;

        let (mut task, plan, decision, documents) = match attempt {
            Ok(done) => done,
            Err(Error::NoEscalationTarget { id: task_id, worker }) => {
                let blocker = self.status(id).await.ok().and_then(|t| t.blocker);
                warn!(task = %task_id, worker = %worker, "no eligible escalation target");
                self.emit(DelegationEvent::NeedsIntervention {
                    task_id: id.clone(),
                    worker: worker.clone(),
                    reason: blocker,
                });
                return Err(Error::NoEscalationTarget { id: task_id, worker });
            }
            Err(e) => return Err(e),
        };

        // The escalation is committed; a failed decision write is noted on
        // the task rather than reported as a failed escalation.
        let mut decision_id = None;
        if let Some(decision) = decision {
            let pending = decision.id.clone();
            let log = self.decisions.clone();
            match blocking(move || log.record(decision)).await {
                Ok(recorded) => decision_id = Some(recorded),
                Err(e) => {
                    error!(task = %id, decision = %pending, error = %e, "escalation decision not recorded");
                    if let Some(updated) = self.note_unrecorded_decision(id, &pending, &e).await {
                        task = updated;
                    }
                }
            }
        }

        info!(
            task = %id,
            from = %plan.from,
            to = %plan.target,
            documents = documents.len(),
            "task escalated"
        );
        self.emit(DelegationEvent::Escalated {
            task_id: id.clone(),
            from: plan.from,
            to: plan.target,
            decision: decision_id,
        });
        Ok(task)
    }

    /// Block an in-progress task with `reason` and escalate it.
    ///
    /// Used for stale tasks whose worker stopped reporting.
    pub async fn force_escalate(&self, id: &TaskId, reason: &str) -> Result<Task> {
        let ledger = self.ledger.clone();
        let target = id.clone();
        let patch = TaskPatch::new(ENGINE_AUTHOR)
            .transition(TaskTransition::Block)
            .blocker(reason);
        self.with_retry(id, move || {
            ledger.modify(&target, |t| patch.apply_to(t, Utc::now()))
        })
        .await?;
        info!(task = %id, reason, "task force-blocked for escalation");
        self.escalate(id).await
    }

    async fn note_unrecorded_decision(
        &self,
        id: &TaskId,
        decision: &DecisionId,
        cause: &Error,
    ) -> Option<Task> {
        let ledger = self.ledger.clone();
        let target = id.clone();
        let note = format!("decision {} could not be recorded: {}", decision, cause);
        let result = self
            .with_retry(id, move || {
                ledger.modify(&target, |t| {
                    t.append_log(ENGINE_AUTHOR, &note, Utc::now());
                    Ok(())
                })
            })
            .await;
        match result {
            Ok(task) => Some(task),
            Err(e) => {
                warn!(task = %id, error = %e, "could not log the missing decision");
                None
            }
        }
    }

    /// Run `attempt` until it stops failing with a retryable error.
    async fn with_retry<T, F>(&self, id: &TaskId, attempt: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        let attempt = Arc::new(attempt);
        let max = self.config.max_update_attempts.max(1);
        let mut tries = 0;
        loop {
            tries += 1;
            let run = Arc::clone(&attempt);
            match blocking(move || (*run)()).await {
                Err(e) if e.is_retryable() && tries >= max => {
                    warn!(task = %id, attempts = tries, "giving up after repeated conflicts");
                    return Err(Error::PersistentConflict {
                        id: id.to_string(),
                        attempts: tries,
                    });
                }
                Err(e) if e.is_retryable() => {
                    let delay = self.backoff(tries);
                    debug!(task = %id, attempt = tries, error = %e, delay_ms = delay.as_millis() as u64, "retrying after conflict");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let jitter = rand::thread_rng().gen_range(0..=self.config.backoff_jitter_ms);
        Duration::from_millis(self.config.backoff_base_ms * u64::from(attempt) + jitter)
    }

    fn emit(&self, event: DelegationEvent) {
        if let Err(e) = self.events.try_send(event) {
            warn!(error = %e, "delegation event dropped");
        }
    }
}

/// Owner of `parent` and the workers it may delegate to, if it restricts
/// delegation at all.
fn delegation_scope(
    ledger: &TaskLedger,
    registry: &Registry,
    parent: &TaskId,
) -> Result<Option<(String, BTreeSet<String>)>> {
    let parent_task = ledger.get(parent)?;
    let owner = registry.find(&parent_task.owner_worker)?;
    if owner.delegation_targets.is_empty() {
        return Ok(None);
    }
    Ok(Some((owner.id.clone(), owner.delegation_targets.clone())))
}

/// Knowledge documents for `worker` and a short description for the log.
fn guidance(
    knowledge: &KnowledgeIndex,
    worker: &str,
    keywords: &[String],
) -> (Vec<KnowledgeDocument>, String) {
    match knowledge.resolve(worker, keywords) {
        Ok(docs) if docs.is_empty() => (docs, "none".to_string()),
        Ok(docs) => {
            let paths: Vec<String> = docs.iter().map(|d| d.path.display().to_string()).collect();
            let note = paths.join(", ");
            (docs, note)
        }
        Err(e) => {
            warn!(worker, error = %e, "proceeding without knowledge guidance");
            (Vec::new(), "unavailable".to_string())
        }
    }
}

/// Pick the owner's first declared escalation target sharing a tag with
/// the task.
///
/// Workers that already owned the task are never eligible, so a chain
/// of escalations cannot cycle back to an earlier owner.
fn plan_escalation(registry: &Registry, task: &Task) -> Result<EscalationPlan> {
    let owner = registry.find(&task.owner_worker)?;
    let wanted = normalize_tags(&task.preferred_tags);

    let mut eligible: Vec<(&str, Vec<String>)> = Vec::new();
    for target in &owner.escalation_targets {
        if task.owner_history.iter().any(|w| w == target) {
            continue;
        }
        let matched = registry.find(target)?.matching_tags(&wanted);
        if !matched.is_empty() {
            eligible.push((target.as_str(), matched));
        }
    }

    let Some((target, matched)) = eligible.first().cloned() else {
        return Err(Error::NoEscalationTarget {
            id: task.id.to_string(),
            worker: owner.id.clone(),
        });
    };
    let tied = eligible
        .iter()
        .skip(1)
        .filter(|(_, m)| m.len() == matched.len())
        .map(|(id, _)| id.to_string())
        .collect();

    Ok(EscalationPlan {
        from: owner.id.clone(),
        target: target.to_string(),
        matched,
        tied,
    })
}

fn judgment_call(task: &Task, plan: &EscalationPlan) -> Option<Decision> {
    if plan.tied.is_empty() {
        return None;
    }
    let alternatives: Vec<String> = plan.tied.iter().map(|w| format!("- {}", w)).collect();
    Some(
        Decision::new(&format!("Escalate {} to {}", task.id, plan.target))
            .with_status(DecisionStatus::Accepted)
            .with_context(&format!(
                "Task \"{}\" was blocked while owned by {}: {}",
                task.title,
                plan.from,
                task.blocker.as_deref().unwrap_or("unspecified")
            ))
            .with_rationale(&format!(
                "{} is the first declared escalation target of {} matching [{}]; {} other target(s) matched as many tags",
                plan.target,
                plan.from,
                plan.matched.join(", "),
                plan.tied.len()
            ))
            .with_alternatives(&alternatives.join("\n"))
            .with_consequences(&format!(
                "{} owns the task; the alternatives stay available for later escalation",
                plan.target
            ))
            .for_task(&task.id),
    )
}
