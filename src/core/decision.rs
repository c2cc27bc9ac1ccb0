//! Decision records.
//!
//! A decision captures a judgment call made during orchestration. Once
//! recorded, only `status` and `superseded_by` may ever change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::task::TaskId;
use crate::error::{Error, Result};
use crate::util::{is_timestamped_id, timestamped_id};

const DECISION_ID_PREFIX: &str = "ADR";

/// Time-derived decision identifier, `ADR-<utc timestamp>-<random hex>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DecisionId(String);

impl DecisionId {
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    pub fn at(now: DateTime<Utc>) -> Self {
        Self(timestamped_id(DECISION_ID_PREFIX, now))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for DecisionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DecisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for DecisionId {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if is_timestamped_id(DECISION_ID_PREFIX, s) {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::InvalidId(s.to_string()))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DecisionStatus {
    #[default]
    Proposed,
    Accepted,
    Deprecated,
    Superseded,
}

impl DecisionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionStatus::Proposed => "proposed",
            DecisionStatus::Accepted => "accepted",
            DecisionStatus::Deprecated => "deprecated",
            DecisionStatus::Superseded => "superseded",
        }
    }
}

impl std::fmt::Display for DecisionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DecisionStatus {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "proposed" => Ok(DecisionStatus::Proposed),
            "accepted" => Ok(DecisionStatus::Accepted),
            "deprecated" => Ok(DecisionStatus::Deprecated),
            "superseded" => Ok(DecisionStatus::Superseded),
            other => Err(Error::InvalidId(format!("unknown decision status '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub id: DecisionId,
    pub title: String,
    pub status: DecisionStatus,
    pub context: String,
    pub rationale: String,
    pub alternatives: String,
    pub consequences: String,
    pub superseded_by: Option<DecisionId>,
    /// Task the decision was made for, if any.
    pub task_ref: Option<TaskId>,
    pub created_at: DateTime<Utc>,
}

impl Decision {
    /// Start a proposed decision with an empty body.
    pub fn new(title: &str) -> Self {
        let now = Utc::now();
        Self {
            id: DecisionId::at(now),
            title: title.to_string(),
            status: DecisionStatus::Proposed,
            context: String::new(),
            rationale: String::new(),
            alternatives: String::new(),
            consequences: String::new(),
            superseded_by: None,
            task_ref: None,
            created_at: now,
        }
    }

    pub fn with_status(mut self, status: DecisionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.context = context.to_string();
        self
    }

    pub fn with_rationale(mut self, rationale: &str) -> Self {
        self.rationale = rationale.to_string();
        self
    }

    pub fn with_alternatives(mut self, alternatives: &str) -> Self {
        self.alternatives = alternatives.to_string();
        self
    }

    pub fn with_consequences(mut self, consequences: &str) -> Self {
        self.consequences = consequences.to_string();
        self
    }

    pub fn for_task(mut self, task: &TaskId) -> Self {
        self.task_ref = Some(task.clone());
        self
    }

    pub fn is_superseded(&self) -> bool {
        self.status == DecisionStatus::Superseded
    }
}
