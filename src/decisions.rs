//! Decision log: append-only store of decision records.
//!
//! Each decision is a Markdown file with TOML front matter, filed apart
//! from the task ledger. Records are immutable except for the status
//! change performed by [`DecisionLog::supersede`] and the single
//! `proposed -> accepted` edit allowed by [`DecisionLog::set_status`].

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::core::{Decision, DecisionId, DecisionStatus, TaskId};
use crate::record::{
    escape_headings, join_front_matter, section, split_front_matter, unescape_headings,
    write_atomic, RecordLock,
};
use crate::{Error, Result};

const LOCK_DIR: &str = ".locks";
const CONTEXT: &str = "Context";
const RATIONALE: &str = "Rationale";
const ALTERNATIVES: &str = "Alternatives";
const CONSEQUENCES: &str = "Consequences";
const SECTIONS: [&str; 4] = [CONTEXT, RATIONALE, ALTERNATIVES, CONSEQUENCES];

#[derive(Debug, Serialize, Deserialize)]
struct DecisionMeta {
    id: DecisionId,
    title: String,
    status: DecisionStatus,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    superseded_by: Option<DecisionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    task_ref: Option<TaskId>,
}

#[derive(Debug, Clone)]
pub struct DecisionLog {
    dir: PathBuf,
}

impl DecisionLog {
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir.join(LOCK_DIR))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    fn record_path(&self, id: &DecisionId) -> PathBuf {
        self.dir.join(format!("{}.md", id))
    }

    fn lock(&self, id: &DecisionId) -> Result<RecordLock> {
        Ok(RecordLock::acquire(
            &self.dir.join(LOCK_DIR).join(format!("{}.lock", id)),
        )?)
    }

    /// Commit `decision`, refusing text that would not decode back to it.
    fn write(&self, decision: &Decision) -> Result<()> {
        let path = self.record_path(&decision.id);
        let text = encode(decision)?;
        if decode(&path, &text)? != *decision {
            return Err(Error::MalformedRecord {
                path,
                reason: "decision would not read back unchanged".to_string(),
            });
        }
        write_atomic(&path, &text)?;
        Ok(())
    }

    /// File a new decision.
    ///
    /// Section text is trimmed and its line endings normalized. A
    /// decision cannot be recorded as superseded; that status is only
    /// reachable through `supersede`.
    pub fn record(&self, decision: Decision) -> Result<DecisionId> {
        if decision.status == DecisionStatus::Superseded || decision.superseded_by.is_some() {
            return Err(Error::InvalidDecisionTransition {
                id: decision.id.to_string(),
                from: "(new)".to_string(),
                to: DecisionStatus::Superseded.to_string(),
            });
        }

        let decision = Decision {
            title: decision.title.trim().to_string(),
            context: clean(&decision.context),
            rationale: clean(&decision.rationale),
            alternatives: clean(&decision.alternatives),
            consequences: clean(&decision.consequences),
            ..decision
        };

        let _lock = self.lock(&decision.id)?;
        if self.record_path(&decision.id).exists() {
            return Err(Error::DuplicateId(decision.id.to_string()));
        }
        self.write(&decision)?;
        info!(decision = %decision.id, title = %decision.title, status = %decision.status, "decision recorded");
        Ok(decision.id)
    }

    pub fn get(&self, id: &DecisionId) -> Result<Decision> {
        let path = self.record_path(id);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::DecisionNotFound(id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        decode(&path, &text)
    }

    /// Every decision, oldest first.
    pub fn list(&self) -> Result<Vec<Decision>> {
        let mut decisions = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let is_record = path.extension().is_some_and(|ext| ext == "md")
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| !n.starts_with('.'));
            if is_record {
                let text = fs::read_to_string(&path)?;
                decisions.push(decode(&path, &text)?);
            }
        }
        decisions.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(decisions)
    }

    /// Accept a proposed decision.
    ///
    /// This is the only direct status edit. Deprecation and supersession
    /// cannot be applied here; superseding goes through `supersede`.
    pub fn set_status(&self, id: &DecisionId, status: DecisionStatus) -> Result<Decision> {
        let _lock = self.lock(id)?;
        let mut decision = self.get(id)?;
        if !(decision.status == DecisionStatus::Proposed && status == DecisionStatus::Accepted) {
            return Err(Error::InvalidDecisionTransition {
                id: id.to_string(),
                from: decision.status.to_string(),
                to: status.to_string(),
            });
        }
        decision.status = status;
        self.write(&decision)?;
        debug!(decision = %id, status = %status, "decision status changed");
        Ok(decision)
    }

    /// Mark `old` as superseded by `new`.
    ///
    /// Re-superseding is a caller error and fails with `AlreadySuperseded`.
    pub fn supersede(&self, old: &DecisionId, new: &DecisionId) -> Result<()> {
        if old == new {
            return Err(Error::InvalidDecisionTransition {
                id: old.to_string(),
                from: "any".to_string(),
                to: "superseded by itself".to_string(),
            });
        }
        self.get(new)?;

        let _lock = self.lock(old)?;
        let mut decision = self.get(old)?;
        if let Some(by) = &decision.superseded_by {
            return Err(Error::AlreadySuperseded {
                id: old.to_string(),
                by: by.to_string(),
            });
        }
        decision.status = DecisionStatus::Superseded;
        decision.superseded_by = Some(new.clone());
        self.write(&decision)?;
        info!(decision = %old, by = %new, "decision superseded");
        Ok(())
    }
}

fn encode(decision: &Decision) -> Result<String> {
    let meta = toml::to_string(&DecisionMeta {
        id: decision.id.clone(),
        title: decision.title.clone(),
        status: decision.status,
        created_at: decision.created_at,
        superseded_by: decision.superseded_by.clone(),
        task_ref: decision.task_ref.clone(),
    })?;

    let heading = decision.title.lines().next().unwrap_or_default();
    let mut body = format!("# {}\n", heading);
    for (name, text) in [
        (CONTEXT, &decision.context),
        (RATIONALE, &decision.rationale),
        (ALTERNATIVES, &decision.alternatives),
        (CONSEQUENCES, &decision.consequences),
    ] {
        body.push_str(&format!("\n## {}\n\n", name));
        if !text.is_empty() {
            body.push_str(&escape_headings(text, &SECTIONS));
            body.push('\n');
        }
    }
    Ok(join_front_matter(&meta, &body))
}

fn clean(text: &str) -> String {
    text.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

fn body_section(body: &str, name: &str) -> String {
    unescape_headings(&section(body, &SECTIONS, name), &SECTIONS)
}

fn decode(path: &Path, text: &str) -> Result<Decision> {
    let (meta, body) = split_front_matter(text).ok_or_else(|| Error::MalformedRecord {
        path: path.to_path_buf(),
        reason: "missing +++ front matter".to_string(),
    })?;
    let meta: DecisionMeta = toml::from_str(&meta).map_err(|e| Error::MalformedRecord {
        path: path.to_path_buf(),
        reason: format!("front matter: {}", e),
    })?;

    Ok(Decision {
        id: meta.id,
        title: meta.title,
        status: meta.status,
        context: body_section(&body, CONTEXT),
        rationale: body_section(&body, RATIONALE),
        alternatives: body_section(&body, ALTERNATIVES),
        consequences: body_section(&body, CONSEQUENCES),
        superseded_by: meta.superseded_by,
        task_ref: meta.task_ref,
        created_at: meta.created_at,
    })
}
