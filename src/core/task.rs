//! Task data model for the delegation ledger.
//!
//! Tasks are the units of work handed to specialist workers. Each task
//! tracks its owner, status, checklist and an append-only log, and moves
//! through a fixed lifecycle:
//!
//! ```text
//! created --delegate--> delegated --accept--> in_progress
//! in_progress --block--> blocked
//! blocked --resolve--> in_progress
//! blocked --escalate--> delegated      (new owner)
//! in_progress --complete--> completed  [terminal]
//! in_progress --fail--> failed         [terminal]
//! blocked --abandon--> failed          [terminal]
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_timestamped_id, timestamped_id};

const TASK_ID_PREFIX: &str = "TASK";

/// Globally unique, time-ordered task identifier.
///
/// Rendered as `TASK-<utc timestamp>-<random hex>`, so lexical order
/// follows creation time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create a new identifier stamped with the current time.
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// Create a new identifier stamped with `now`.
    pub fn at(now: DateTime<Utc>) -> Self {
        Self(timestamped_id(TASK_ID_PREFIX, now))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if is_timestamped_id(TASK_ID_PREFIX, s) {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::InvalidId(s.to_string()))
        }
    }
}

/// Task status in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Recorded in the ledger, no worker engaged yet.
    #[default]
    Created,
    /// Handed to a worker that has not yet picked it up.
    Delegated,
    /// The owning worker is executing it.
    InProgress,
    /// The owning worker reported a blocker.
    Blocked,
    Completed,
    Failed,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Created,
        TaskStatus::Delegated,
        TaskStatus::InProgress,
        TaskStatus::Blocked,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ];

    /// Completed and failed tasks never change status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Status reached by applying `transition`, if it is legal from here.
    pub fn apply(&self, transition: TaskTransition) -> Option<TaskStatus> {
        let (from, to) = transition.edge();
        (from == *self).then_some(to)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::Delegated => "delegated",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Blocked => "blocked",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        TaskStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized)
            .ok_or_else(|| Error::InvalidId(format!("unknown task status '{}'", s)))
    }
}

/// Named edges of the task state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskTransition {
    Delegate,
    Accept,
    Block,
    Resolve,
    Escalate,
    Complete,
    Fail,
    Abandon,
}

impl TaskTransition {
    pub const ALL: [TaskTransition; 8] = [
        TaskTransition::Delegate,
        TaskTransition::Accept,
        TaskTransition::Block,
        TaskTransition::Resolve,
        TaskTransition::Escalate,
        TaskTransition::Complete,
        TaskTransition::Fail,
        TaskTransition::Abandon,
    ];

    /// Source and target status of this edge.
    pub fn edge(&self) -> (TaskStatus, TaskStatus) {
        use TaskStatus::*;
        match self {
            TaskTransition::Delegate => (Created, Delegated),
            TaskTransition::Accept => (Delegated, InProgress),
            TaskTransition::Block => (InProgress, Blocked),
            TaskTransition::Resolve => (Blocked, InProgress),
            TaskTransition::Escalate => (Blocked, Delegated),
            TaskTransition::Complete => (InProgress, Completed),
            TaskTransition::Fail => (InProgress, Failed),
            TaskTransition::Abandon => (Blocked, Failed),
        }
    }

    pub fn target(&self) -> TaskStatus {
        self.edge().1
    }

    /// The unique edge connecting two statuses, if any.
    pub fn between(from: TaskStatus, to: TaskStatus) -> Option<TaskTransition> {
        TaskTransition::ALL
            .into_iter()
            .find(|t| t.edge() == (from, to))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskTransition::Delegate => "delegate",
            TaskTransition::Accept => "accept",
            TaskTransition::Block => "block",
            TaskTransition::Resolve => "resolve",
            TaskTransition::Escalate => "escalate",
            TaskTransition::Complete => "complete",
            TaskTransition::Fail => "fail",
            TaskTransition::Abandon => "abandon",
        }
    }
}

impl std::fmt::Display for TaskTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskTransition {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        TaskTransition::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| Error::InvalidId(format!("unknown transition '{}'", s)))
    }
}

/// One reviewable step of a task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub description: String,
    pub done: bool,
}

/// One line of a task's append-only history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub note: String,
}

/// A unit of delegated work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    /// The goal this task was created for.
    pub title: String,
    /// Worker currently responsible.
    pub owner_worker: String,
    /// Originating coordination task, for nested delegation.
    pub coordinator_ref: Option<TaskId>,
    pub status: TaskStatus,
    /// Capability tags requested at delegation time.
    pub preferred_tags: Vec<String>,
    /// Every worker that has owned this task, oldest first.
    pub owner_history: Vec<String>,
    /// Reason reported with the most recent block.
    pub blocker: Option<String>,
    pub checklist: Vec<ChecklistItem>,
    pub log_entries: Vec<LogEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency token, bumped by every committed write.
    pub version: u64,
}

impl Task {
    /// Create a task in the `created` state owned by `owner`.
    pub fn new(
        id: TaskId,
        title: &str,
        owner: &str,
        preferred_tags: Vec<String>,
        coordinator_ref: Option<TaskId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            title: title.to_string(),
            owner_worker: owner.to_string(),
            coordinator_ref,
            status: TaskStatus::Created,
            preferred_tags,
            owner_history: vec![owner.to_string()],
            blocker: None,
            checklist: Vec::new(),
            log_entries: Vec::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Move along one edge of the state machine.
    ///
    /// Completing requires every checklist item to be done. Leaving the
    /// blocked state clears the recorded blocker.
    pub fn apply_transition(&mut self, transition: TaskTransition) -> Result<()> {
        let next = self
            .status
            .apply(transition)
            .ok_or_else(|| Error::InvalidTransition {
                id: self.id.to_string(),
                from: self.status.to_string(),
                to: transition.target().to_string(),
            })?;

        if next == TaskStatus::Completed {
            let remaining = self.open_items();
            if remaining > 0 {
                return Err(Error::IncompleteChecklist {
                    id: self.id.to_string(),
                    remaining,
                });
            }
        }

        if matches!(transition, TaskTransition::Resolve | TaskTransition::Escalate) {
            self.blocker = None;
        }
        self.status = next;
        Ok(())
    }

    /// Hand the task to a new owner. Only legal alongside an escalation.
    pub fn reassign(&mut self, worker: &str) {
        self.owner_worker = worker.to_string();
        self.owner_history.push(worker.to_string());
    }

    /// Append a log entry. Line endings in `note` are normalized to `\n`.
    pub fn append_log(&mut self, author: &str, note: &str, at: DateTime<Utc>) {
        self.log_entries.push(LogEntry {
            timestamp: at,
            author: author.to_string(),
            note: normalize_newlines(note),
        });
    }

    pub fn add_checklist_item(&mut self, description: &str) {
        self.checklist.push(ChecklistItem {
            description: normalize_newlines(description),
            done: false,
        });
    }

    /// Mark the item at `index` (zero-based) as done.
    pub fn mark_done(&mut self, index: usize) -> Result<()> {
        let id = self.id.to_string();
        let item = self
            .checklist
            .get_mut(index)
            .ok_or_else(|| Error::InvalidMutation {
                id,
                reason: format!("checklist has no item {}", index + 1),
            })?;
        item.done = true;
        Ok(())
    }

    /// Number of checklist items not yet done.
    pub fn open_items(&self) -> usize {
        self.checklist.iter().filter(|item| !item.done).count()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Most recent log entry, if any.
    pub fn last_log(&self) -> Option<&LogEntry> {
        self.log_entries.last()
    }
}

/// Structured update reported by a worker or the coordinator.
///
/// Applying a patch always appends a log entry, so every change to a
/// task is attributable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPatch {
    pub author: String,
    pub transition: Option<TaskTransition>,
    pub note: Option<String>,
    /// Reason recorded when the patch blocks the task.
    pub blocker: Option<String>,
    /// Checklist items to append.
    pub add_items: Vec<String>,
    /// Zero-based checklist indices to mark done.
    pub done_items: Vec<usize>,
}

impl TaskPatch {
    pub fn new(author: &str) -> Self {
        Self {
            author: author.to_string(),
            ..Default::default()
        }
    }

    pub fn transition(mut self, transition: TaskTransition) -> Self {
        self.transition = Some(transition);
        self
    }

    pub fn note(mut self, note: &str) -> Self {
        self.note = Some(note.to_string());
        self
    }

    pub fn blocker(mut self, reason: &str) -> Self {
        self.blocker = Some(reason.to_string());
        self
    }

    pub fn add_item(mut self, description: &str) -> Self {
        self.add_items.push(description.to_string());
        self
    }

    pub fn done_item(mut self, index: usize) -> Self {
        self.done_items.push(index);
        self
    }

    /// Apply the patch to `task`.
    ///
    /// Checklist edits land before the transition so a single patch can
    /// tick the last item and complete the task.
    pub fn apply_to(&self, task: &mut Task, now: DateTime<Utc>) -> Result<()> {
        for description in &self.add_items {
            task.add_checklist_item(description);
        }
        for index in &self.done_items {
            task.mark_done(*index)?;
        }
        if let Some(transition) = self.transition {
            task.apply_transition(transition)?;
            if transition == TaskTransition::Block {
                task.blocker = self.blocker.clone().or_else(|| self.note.clone());
            }
        }
        task.append_log(&self.author, &self.summary(), now);
        Ok(())
    }

    /// Human-readable description of the patch, used as the log note.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if let Some(transition) = self.transition {
            parts.push(format!("{} -> {}", transition, transition.target()));
        }
        if let Some(reason) = &self.blocker {
            parts.push(format!("blocker: {}", reason));
        }
        if !self.add_items.is_empty() {
            parts.push(format!("added {} checklist item(s)", self.add_items.len()));
        }
        if !self.done_items.is_empty() {
            let items: Vec<String> = self.done_items.iter().map(|i| (i + 1).to_string()).collect();
            parts.push(format!("checked item(s) {}", items.join(", ")));
        }
        if let Some(note) = &self.note {
            parts.push(note.clone());
        }
        if parts.is_empty() {
            "no-op update".to_string()
        } else {
            parts.join("; ")
        }
    }
}

fn normalize_newlines(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n")
}
