//! TaskLedger - durable, file-per-task store with optimistic concurrency.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::core::{Task, TaskId, TaskStatus, TaskTransition};
use crate::ledger::codec;
use crate::record::{write_atomic, RecordLock};
use crate::{Error, Result};

const LOCK_DIR: &str = ".locks";

/// Durable store of task records, one Markdown file per task.
///
/// Every write goes through a per-task advisory lock, so the
/// read-compare-write inside `update` is atomic across threads and
/// processes. Reads parse the committed file and therefore always see the
/// last successful write.
#[derive(Debug, Clone)]
pub struct TaskLedger {
    dir: PathBuf,
}

impl TaskLedger {
    /// Open (and create if needed) a ledger rooted at `dir`.
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir.join(LOCK_DIR))?;
        debug!(dir = %dir.display(), "task ledger opened");
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, id: &TaskId) -> PathBuf {
        self.dir.join(format!("{}.md", id))
    }

    fn lock(&self, id: &TaskId) -> Result<RecordLock> {
        Ok(RecordLock::acquire(
            &self.dir.join(LOCK_DIR).join(format!("{}.lock", id)),
        )?)
    }

    /// Encode `task`, refusing text that would not decode back to it.
    ///
    /// A record that cannot be read back is never committed.
    fn encode_checked(&self, task: &Task) -> Result<String> {
        let text = codec::encode(task)?;
        match codec::decode(&self.record_path(&task.id), &text) {
            Ok(decoded) if decoded == *task => Ok(text),
            _ => Err(Error::InvalidMutation {
                id: task.id.to_string(),
                reason: "record would not read back unchanged".to_string(),
            }),
        }
    }

    /// Persist a new task. It must be in the `created` state.
    pub fn create(&self, task: &Task) -> Result<TaskId> {
        if task.status != TaskStatus::Created {
            return Err(Error::InvalidTransition {
                id: task.id.to_string(),
                from: "(new)".to_string(),
                to: task.status.to_string(),
            });
        }

        let _lock = self.lock(&task.id)?;
        let path = self.record_path(&task.id);
        if path.exists() {
            return Err(Error::DuplicateId(task.id.to_string()));
        }
        write_atomic(&path, &self.encode_checked(task)?)?;
        debug!(task = %task.id, owner = %task.owner_worker, "task created");
        Ok(task.id.clone())
    }

    pub fn get(&self, id: &TaskId) -> Result<Task> {
        let path = self.record_path(id);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::TaskNotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        codec::decode(&path, &text)
    }

    /// Atomically apply `mutation` to the task at `expected_version`.
    ///
    /// Fails with `Conflict` when another writer committed since that
    /// version was read. The mutated record is checked against the stored
    /// one before it is written; see [`verify_mutation`].
    pub fn update<F>(&self, id: &TaskId, expected_version: u64, mutation: F) -> Result<Task>
    where
        F: FnOnce(&mut Task) -> Result<()>,
    {
        let _lock = self.lock(id)?;
        let current = self.get(id)?;
        if current.version != expected_version {
            warn!(task = %id, expected = expected_version, found = current.version, "update conflict");
            return Err(Error::Conflict {
                id: id.to_string(),
                expected: expected_version,
                found: current.version,
            });
        }

        let mut next = current.clone();
        mutation(&mut next)?;
        verify_mutation(&current, &next)?;

        next.version = current.version + 1;
        next.updated_at = Utc::now().max(current.updated_at);
        write_atomic(&self.record_path(id), &self.encode_checked(&next)?)?;
        debug!(task = %id, version = next.version, status = %next.status, "task updated");
        Ok(next)
    }

    /// Read the task and update it against the version just read.
    pub fn modify<F>(&self, id: &TaskId, mutation: F) -> Result<Task>
    where
        F: FnOnce(&mut Task) -> Result<()>,
    {
        let snapshot = self.get(id)?;
        self.update(id, snapshot.version, mutation)
    }

    /// Every task in the ledger, oldest first.
    pub fn list_all(&self) -> Result<Vec<Task>> {
        let mut tasks = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_record = path.extension().is_some_and(|ext| ext == "md")
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| !n.starts_with('.'));
            if !is_record {
                continue;
            }
            let text = fs::read_to_string(&path)?;
            tasks.push(codec::decode(&path, &text)?);
        }
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }

    /// Tasks in `status`, ordered by creation time.
    pub fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|t| t.status == status)
            .collect())
    }

    /// Delegated or in-progress tasks untouched for longer than `threshold`.
    pub fn list_stale(&self, threshold: Duration, now: DateTime<Utc>) -> Result<Vec<Task>> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|t| matches!(t.status, TaskStatus::Delegated | TaskStatus::InProgress))
            .filter(|t| now - t.updated_at > threshold)
            .collect())
    }

    /// Tasks spawned from the coordination task `parent`.
    pub fn children(&self, parent: &TaskId) -> Result<Vec<Task>> {
        Ok(self
            .list_all()?
            .into_iter()
            .filter(|t| t.coordinator_ref.as_ref() == Some(parent))
            .collect())
    }
}

/// Check that `after` is a legal successor of `before`.
///
/// Identity fields never change, the log only grows, checklist items are
/// only appended or ticked, status follows the state machine, and the
/// owner changes only on escalation. Terminal tasks accept log appends
/// and nothing else.
pub fn verify_mutation(before: &Task, after: &Task) -> Result<()> {
    let id = before.id.to_string();
    let invalid = |reason: &str| Error::InvalidMutation {
        id: id.clone(),
        reason: reason.to_string(),
    };

    if after.id != before.id
        || after.created_at != before.created_at
        || after.coordinator_ref != before.coordinator_ref
        || after.title != before.title
        || after.preferred_tags != before.preferred_tags
    {
        return Err(invalid("identity fields are immutable"));
    }
    if after.version != before.version {
        return Err(invalid("version is managed by the ledger"));
    }

    if after.log_entries.len() < before.log_entries.len()
        || after.log_entries[..before.log_entries.len()] != before.log_entries[..]
    {
        return Err(invalid("log entries are append-only"));
    }
    if let Some(entry) = after.log_entries[before.log_entries.len()..]
        .iter()
        .find(|e| !codec::is_writable_author(&e.author))
    {
        return Err(invalid(&format!("log author {:?} cannot be recorded", entry.author)));
    }

    let transition = if after.status == before.status {
        None
    } else {
        let t = TaskTransition::between(before.status, after.status).ok_or_else(|| {
            Error::InvalidTransition {
                id: id.clone(),
                from: before.status.to_string(),
                to: after.status.to_string(),
            }
        })?;
        Some(t)
    };

    if before.is_terminal() {
        let mut frozen = after.clone();
        frozen.log_entries = before.log_entries.clone();
        frozen.updated_at = before.updated_at;
        if frozen != *before {
            return Err(invalid("terminal tasks only accept log entries"));
        }
        return Ok(());
    }

    if after.checklist.len() < before.checklist.len() {
        return Err(invalid("checklist items cannot be removed"));
    }
    for (old, new) in before.checklist.iter().zip(&after.checklist) {
        if old.description != new.description {
            return Err(invalid("checklist items cannot be reworded or reordered"));
        }
        if old.done && !new.done {
            return Err(invalid("checklist items cannot be un-done"));
        }
    }
    if after.status == TaskStatus::Completed && after.open_items() > 0 {
        return Err(Error::IncompleteChecklist {
            id: id.clone(),
            remaining: after.open_items(),
        });
    }

    let escalating = transition == Some(TaskTransition::Escalate);
    if after.owner_worker != before.owner_worker {
        if !escalating {
            return Err(invalid("owner changes only on escalation"));
        }
        let mut expected_history = before.owner_history.clone();
        expected_history.push(after.owner_worker.clone());
        if after.owner_history != expected_history {
            return Err(invalid("owner history must record the new owner"));
        }
    } else if escalating {
        return Err(invalid("escalation requires a new owner"));
    } else if after.owner_history != before.owner_history {
        return Err(invalid("owner history is append-only"));
    }

    Ok(())
}
