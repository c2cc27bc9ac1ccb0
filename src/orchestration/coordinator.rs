//! Coordinator: the outward-facing entry point over one workspace.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::mpsc;
use tracing::info;

use crate::config::Config;
use crate::core::{Decision, DecisionId, DecisionStatus, Task, TaskId, TaskPatch, TaskStatus};
use crate::decisions::DecisionLog;
use crate::knowledge::{KnowledgeDocument, KnowledgeIndex};
use crate::ledger::TaskLedger;
use crate::orchestration::engine::{DelegationEngine, DelegationEvent};
use crate::registry::{Registry, Worker};
use crate::util::blocking;
use crate::{Error, Result};

pub struct Coordinator {
    workspace: PathBuf,
    config: Config,
    engine: DelegationEngine,
    events: Option<mpsc::Receiver<DelegationEvent>>,
}

impl Coordinator {
    /// Open the workspace at `workspace` using its `commander.toml`.
    pub fn open(workspace: &Path) -> Result<Self> {
        let config = Config::load(workspace)?;
        Self::with_config(workspace, config)
    }

    /// Open the workspace with an explicit configuration.
    ///
    /// The worker registry must load cleanly; nothing starts on a broken
    /// catalog.
    pub fn with_config(workspace: &Path, config: Config) -> Result<Self> {
        let registry = Arc::new(Registry::load(&config.registry_path(workspace))?);
        let knowledge = Arc::new(KnowledgeIndex::load(
            &config.kb_root_path(workspace),
            &registry,
        ));
        let ledger = TaskLedger::open(&config.ledger_path(workspace))?;
        let decisions = DecisionLog::open(&config.decisions_path(workspace))?;
        let (engine, events) =
            DelegationEngine::new(ledger, registry, knowledge, decisions, config.engine.clone());

        info!(workspace = %workspace.display(), "coordinator ready");
        Ok(Self {
            workspace: workspace.to_path_buf(),
            config,
            engine,
            events: Some(events),
        })
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Take the delegation event stream. Only the first call gets it.
    pub fn subscribe(&mut self) -> Option<mpsc::Receiver<DelegationEvent>> {
        self.events.take()
    }

    pub async fn delegate(
        &self,
        goal: &str,
        preferred_tags: &[String],
        coordinator_ref: Option<TaskId>,
    ) -> Result<TaskId> {
        self.engine.delegate(goal, preferred_tags, coordinator_ref).await
    }

    pub async fn status(&self, id: &TaskId) -> Result<Task> {
        self.engine.status(id).await
    }

    pub async fn update(&self, id: &TaskId, patch: TaskPatch) -> Result<Task> {
        self.engine.update(id, patch).await
    }

    /// Escalate a blocked task. The task keeps its id.
    pub async fn escalate(&self, id: &TaskId) -> Result<TaskId> {
        Ok(self.engine.escalate(id).await?.id)
    }

    pub async fn force_escalate(&self, id: &TaskId, reason: &str) -> Result<Task> {
        self.engine.force_escalate(id, reason).await
    }

    /// Tasks in `status`, or every task, oldest first.
    pub async fn list(&self, status: Option<TaskStatus>) -> Result<Vec<Task>> {
        let ledger = self.engine.ledger().clone();
        blocking(move || match status {
            Some(status) => ledger.list_by_status(status),
            None => ledger.list_all(),
        })
        .await
    }

    /// Tasks spawned from `parent`.
    pub async fn children(&self, parent: &TaskId) -> Result<Vec<Task>> {
        let ledger = self.engine.ledger().clone();
        let parent = parent.clone();
        blocking(move || ledger.children(&parent)).await
    }

    /// Delegated or in-progress tasks idle longer than the configured
    /// staleness threshold. Candidates for `force_escalate`.
    pub async fn stale(&self) -> Result<Vec<Task>> {
        let ledger = self.engine.ledger().clone();
        let threshold = Duration::seconds(self.config.engine.stale_after_secs as i64);
        blocking(move || ledger.list_stale(threshold, Utc::now())).await
    }

    pub async fn record_decision(&self, decision: Decision) -> Result<DecisionId> {
        let log = self.engine.decisions().clone();
        blocking(move || log.record(decision)).await
    }

    /// Direct status edit; only `proposed -> accepted` is allowed.
    pub async fn set_decision_status(
        &self,
        id: &DecisionId,
        status: DecisionStatus,
    ) -> Result<Decision> {
        let log = self.engine.decisions().clone();
        let id = id.clone();
        blocking(move || log.set_status(&id, status)).await
    }

    pub async fn supersede(&self, old: &DecisionId, new: &DecisionId) -> Result<()> {
        let log = self.engine.decisions().clone();
        let (old, new) = (old.clone(), new.clone());
        blocking(move || log.supersede(&old, &new)).await
    }

    pub async fn decision(&self, id: &DecisionId) -> Result<Decision> {
        let log = self.engine.decisions().clone();
        let id = id.clone();
        blocking(move || log.get(&id)).await
    }

    pub async fn decisions(&self) -> Result<Vec<Decision>> {
        let log = self.engine.decisions().clone();
        blocking(move || log.list()).await
    }

    pub fn workers(&self) -> &[Worker] {
        self.engine.registry().workers()
    }

    pub fn worker(&self, id: &str) -> Result<&Worker> {
        self.engine.registry().find(id)
    }

    /// Every knowledge document of `worker`.
    pub fn documents(&self, worker: &str) -> Result<Vec<KnowledgeDocument>> {
        self.engine.registry().find(worker)?;
        Ok(self.engine.knowledge().documents(worker)?.to_vec())
    }

    /// Knowledge documents of `worker` matching `keywords`.
    pub fn knowledge(&self, worker: &str, keywords: &[String]) -> Result<Vec<KnowledgeDocument>> {
        self.engine.registry().find(worker)?;
        self.engine.knowledge().resolve(worker, keywords)
    }
}

/// Plain-language report of `err` for operators: what went wrong, its
/// kind, and what to do next.
pub fn describe_error(err: &Error) -> String {
    let hint = match err {
        Error::TaskNotFound(_) | Error::DecisionNotFound(_) => {
            Some("check the id with `commander list` or `commander decision`".to_string())
        }
        Error::WorkerNotFound(_) => Some("see `commander workers` for known ids".to_string()),
        Error::NoCapableWorker { .. } => {
            Some("widen the capability tags or add a worker declaring one of them".to_string())
        }
        Error::Conflict { .. } | Error::PersistentConflict { .. } => {
            Some("another writer is updating this task; re-read it and try again".to_string())
        }
        Error::IncompleteChecklist { .. } => {
            Some("mark the remaining checklist items done first".to_string())
        }
        Error::NoEscalationTarget { .. } => Some(
            "the task stays blocked; resolve it, abandon it, or add an escalation target"
                .to_string(),
        ),
        Error::AlreadySuperseded { .. } => {
            Some("supersede the newer decision instead".to_string())
        }
        Error::InvalidDecisionTransition { .. } => {
            Some("decisions can only be accepted directly; use `supersede` to retire one".to_string())
        }
        Error::KbUnavailable { .. } => {
            Some("work can proceed without knowledge guidance".to_string())
        }
        Error::RegistryLoad { problems } => Some(format!(
            "fix the worker catalog:\n{}",
            problems
                .iter()
                .map(|p| format!("  - {}", p))
                .collect::<Vec<_>>()
                .join("\n")
        )),
        _ => None,
    };

    match hint {
        Some(hint) => format!("error [{}]: {}\n{}", err.kind(), err, hint),
        None => format!("error [{}]: {}", err.kind(), err),
    }
}
