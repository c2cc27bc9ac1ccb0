//! Task record encoding.
//!
//! Machine metadata lives in TOML front matter; the checklist and log are
//! rendered as Markdown lists so the record reads naturally:
//!
//! ```text
//! +++
//! id = "TASK-20261016T090807123-3f9a2c"
//! title = "Add login endpoint"
//! status = "in_progress"
//! owner_worker = "backend"
//! ...
//! +++
//!
//! # Add login endpoint
//!
//! ## Checklist
//!
//! - [x] Write handler
//! - [ ] Write tests
//!
//! ## Log
//!
//! - `2026-10-16T09:08:07.123Z` **coordinator**: selected backend (matched: api)
//! ```

use std::path::Path;
use std::sync::OnceLock;

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::{ChecklistItem, LogEntry, Task, TaskId, TaskStatus};
use crate::record::{fold, join_front_matter, list_items, section, split_front_matter};
use crate::{Error, Result};

const CHECKLIST: &str = "Checklist";
const LOG: &str = "Log";
const SECTIONS: [&str; 2] = [CHECKLIST, LOG];

#[derive(Debug, Serialize, Deserialize)]
struct TaskMeta {
    id: TaskId,
    title: String,
    status: TaskStatus,
    owner_worker: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    coordinator_ref: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    blocker: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
    #[serde(default)]
    preferred_tags: Vec<String>,
    #[serde(default)]
    owner_history: Vec<String>,
}

pub fn encode(task: &Task) -> Result<String> {
    let meta = TaskMeta {
        id: task.id.clone(),
        title: task.title.clone(),
        status: task.status,
        owner_worker: task.owner_worker.clone(),
        coordinator_ref: task.coordinator_ref.clone(),
        blocker: task.blocker.clone(),
        created_at: task.created_at,
        updated_at: task.updated_at,
        version: task.version,
        preferred_tags: task.preferred_tags.clone(),
        owner_history: task.owner_history.clone(),
    };
    let meta = toml::to_string(&meta)?;

    let heading = task.title.lines().next().unwrap_or_default();
    let mut body = format!("# {}\n\n## {}\n\n", heading, CHECKLIST);
    for item in &task.checklist {
        let mark = if item.done { "x" } else { " " };
        body.push_str(&format!("- [{}] {}\n", mark, fold(&item.description)));
    }
    if !task.checklist.is_empty() {
        body.push('\n');
    }
    body.push_str(&format!("## {}\n\n", LOG));
    for entry in &task.log_entries {
        body.push_str(&format!(
            "- `{}` **{}**: {}\n",
            entry.timestamp.to_rfc3339_opts(SecondsFormat::AutoSi, true),
            entry.author,
            fold(&entry.note)
        ));
    }
    Ok(join_front_matter(&meta, &body))
}

/// Whether `author` fits on a log line and reads back unchanged.
///
/// Authors are single-line names: no control characters, no backticks
/// and no `**`, which delimit the author on the line.
pub fn is_writable_author(author: &str) -> bool {
    !author.trim().is_empty()
        && !author.contains("**")
        && !author.contains('`')
        && !author.chars().any(char::is_control)
}

pub fn decode(path: &Path, text: &str) -> Result<Task> {
    let malformed = |reason: String| Error::MalformedRecord {
        path: path.to_path_buf(),
        reason,
    };

    let (meta, body) =
        split_front_matter(text).ok_or_else(|| malformed("missing +++ front matter".into()))?;
    let meta: TaskMeta =
        toml::from_str(&meta).map_err(|e| malformed(format!("front matter: {}", e)))?;

    let checklist = list_items(&section(&body, &SECTIONS, CHECKLIST))
        .into_iter()
        .map(|item| parse_checklist_item(&item).ok_or_else(|| malformed(format!("bad checklist item '{}'", item))))
        .collect::<Result<Vec<_>>>()?;
    let log_entries = list_items(&section(&body, &SECTIONS, LOG))
        .into_iter()
        .map(|item| parse_log_entry(&item).ok_or_else(|| malformed(format!("bad log entry '{}'", item))))
        .collect::<Result<Vec<_>>>()?;

    Ok(Task {
        id: meta.id,
        title: meta.title,
        owner_worker: meta.owner_worker,
        coordinator_ref: meta.coordinator_ref,
        status: meta.status,
        preferred_tags: meta.preferred_tags,
        owner_history: meta.owner_history,
        blocker: meta.blocker,
        checklist,
        log_entries,
        created_at: meta.created_at,
        updated_at: meta.updated_at,
        version: meta.version,
    })
}

fn parse_checklist_item(item: &str) -> Option<ChecklistItem> {
    let (done, description) = if let Some(rest) = item.strip_prefix("[ ] ") {
        (false, rest)
    } else if let Some(rest) = item
        .strip_prefix("[x] ")
        .or_else(|| item.strip_prefix("[X] "))
    {
        (true, rest)
    } else {
        return None;
    };
    Some(ChecklistItem {
        description: description.to_string(),
        done,
    })
}

fn parse_log_entry(item: &str) -> Option<LogEntry> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"(?s)^`([^`]+)` \*\*(.+?)\*\*: ?(.*)$").expect("log pattern is valid")
    });
    let caps = pattern.captures(item)?;
    let timestamp = DateTime::parse_from_rfc3339(caps.get(1)?.as_str())
        .ok()?
        .with_timezone(&Utc);
    Some(LogEntry {
        timestamp,
        author: caps.get(2)?.as_str().to_string(),
        note: caps.get(3)?.as_str().to_string(),
    })
}
