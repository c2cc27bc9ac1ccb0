use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Task join error: {0}")]
    TaskJoin(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Decision not found: {0}")]
    DecisionNotFound(String),

    #[error("Worker not found: {0}")]
    WorkerNotFound(String),

    #[error("Record already exists: {0}")]
    DuplicateId(String),

    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("Worker registry failed to load: {}", .problems.join("; "))]
    RegistryLoad { problems: Vec<String> },

    #[error("No worker declares any of the tags [{}]", .tags.join(", "))]
    NoCapableWorker { tags: Vec<String> },

    #[error("Knowledge base unavailable for worker {worker}: {path}")]
    KbUnavailable { worker: String, path: PathBuf },

    #[error("Task {id} was updated concurrently (expected version {expected}, found {found})")]
    Conflict { id: String, expected: u64, found: u64 },

    #[error("Task {id} kept conflicting after {attempts} attempts")]
    PersistentConflict { id: String, attempts: u32 },

    #[error("Invalid transition for task {id}: {from} -> {to}")]
    InvalidTransition { id: String, from: String, to: String },

    #[error("Task {id} cannot complete with {remaining} open checklist item(s)")]
    IncompleteChecklist { id: String, remaining: usize },

    #[error("Invalid mutation of task {id}: {reason}")]
    InvalidMutation { id: String, reason: String },

    #[error("Invalid status change for decision {id}: {from} -> {to}")]
    InvalidDecisionTransition { id: String, from: String, to: String },

    #[error("Decision {id} is already superseded by {by}")]
    AlreadySuperseded { id: String, by: String },

    #[error("No eligible escalation target for task {id} owned by {worker}")]
    NoEscalationTarget { id: String, worker: String },

    #[error("Malformed record {path}: {reason}")]
    MalformedRecord { path: PathBuf, reason: String },

    #[error("No home directory")]
    NoHomeDir,
}

impl Error {
    /// Stable snake_case name of the error kind, used in CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) | Error::TomlParse(_) | Error::TomlSerialize(_) => "serialization",
            Error::TaskJoin(_) => "internal",
            Error::TaskNotFound(_) | Error::DecisionNotFound(_) | Error::WorkerNotFound(_) => {
                "not_found"
            }
            Error::DuplicateId(_) => "duplicate_id",
            Error::InvalidId(_) => "invalid_id",
            Error::RegistryLoad { .. } => "registry_load",
            Error::NoCapableWorker { .. } => "no_capable_worker",
            Error::KbUnavailable { .. } => "kb_unavailable",
            Error::Conflict { .. } => "conflict",
            Error::PersistentConflict { .. } => "persistent_conflict",
            Error::InvalidTransition { .. }
            | Error::IncompleteChecklist { .. }
            | Error::InvalidMutation { .. }
            | Error::InvalidDecisionTransition { .. } => "invalid_transition",
            Error::AlreadySuperseded { .. } => "already_superseded",
            Error::NoEscalationTarget { .. } => "no_escalation_target",
            Error::MalformedRecord { .. } => "malformed_record",
            Error::NoHomeDir => "configuration",
        }
    }

    /// Process exit code for the CLI. Zero is reserved for success.
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            "not_found" => 2,
            "no_capable_worker" => 3,
            "conflict" | "persistent_conflict" => 4,
            "invalid_transition" => 5,
            "already_superseded" => 6,
            "no_escalation_target" => 7,
            "kb_unavailable" => 8,
            "registry_load" | "configuration" => 9,
            "duplicate_id" | "invalid_id" => 10,
            _ => 1,
        }
    }

    /// Only optimistic-concurrency conflicts may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
