//! Test fixtures for integration tests.
//!
//! Provides a temporary workspace with:
//! - A worker catalog covering selection, escalation and dead ends
//! - A small knowledge base
//! - Helpers to open a coordinator and move tasks along

use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;

use commander::config::{Config, EngineConfig};
use commander::{Coordinator, TaskId, TaskPatch, TaskTransition};

/// Catalog used by most tests.
///
/// - `w1` and `w2` share tag `x`; `w1` also declares `y`.
/// - `w1` escalates to `lead` then `w2`, which tie on a goal tagged `x, y`.
/// - `picky` escalates only to `designer`, which never matches its work.
/// - `solo` has no escalation targets.
pub const CATALOG: &str = r#"
[[worker]]
id = "w1"
summary = "Primary implementer"
tags = ["x", "y"]
escalation_targets = ["lead", "w2"]
delegation_targets = ["w2"]

[[worker]]
id = "w2"
summary = "Secondary implementer"
tags = ["x"]

[[worker]]
id = "lead"
summary = "Technical lead"
tags = ["y", "review"]

[[worker]]
id = "picky"
tags = ["p"]
escalation_targets = ["designer"]

[[worker]]
id = "designer"
tags = ["ui"]

[[worker]]
id = "solo"
tags = ["solo"]
"#;

/// A workspace in a temporary directory.
pub struct TestWorkspace {
    /// Keeps the directory alive for the test's duration.
    pub temp_dir: TempDir,
    pub path: PathBuf,
}

impl TestWorkspace {
    pub fn new() -> Self {
        Self::with_catalog(CATALOG)
    }

    pub fn with_catalog(catalog: &str) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let path = temp_dir.path().to_path_buf();
        fs::write(path.join("workers.toml"), catalog).expect("Failed to write catalog");

        let workspace = Self { temp_dir, path };
        workspace.write_kb("w1", "auth.md", &["auth", "x"]);
        workspace.write_kb("w1", "guides/style.md", &["style"]);
        workspace.write_kb("lead", "review.md", &["review", "auth"]);
        workspace
    }

    /// Add a tagged knowledge document for `worker`.
    pub fn write_kb(&self, worker: &str, name: &str, tags: &[&str]) {
        let path = self.path.join("kb").join(worker).join(name);
        fs::create_dir_all(path.parent().unwrap()).expect("Failed to create kb dir");
        let tags: Vec<String> = tags.iter().map(|t| format!("\"{}\"", t)).collect();
        fs::write(
            &path,
            format!("+++\ntags = [{}]\n+++\n# {}\n", tags.join(", "), name),
        )
        .expect("Failed to write kb document");
    }

    pub fn coordinator(&self) -> Coordinator {
        Coordinator::open(&self.path).expect("Failed to open coordinator")
    }

    pub fn coordinator_with(&self, engine: EngineConfig) -> Coordinator {
        let config = Config {
            engine,
            ..Config::default()
        };
        Coordinator::with_config(&self.path, config).expect("Failed to open coordinator")
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.path.join(".commander/tasks")
    }

    pub fn task_file(&self, id: &TaskId) -> PathBuf {
        self.ledger_dir().join(format!("{}.md", id))
    }
}

/// Engine settings without auto-escalation, so tests can observe the
/// blocked state directly.
pub fn manual_escalation() -> EngineConfig {
    EngineConfig {
        auto_escalate: false,
        ..EngineConfig::default()
    }
}

pub fn tags(list: &[&str]) -> Vec<String> {
    list.iter().map(|t| t.to_string()).collect()
}

/// Delegate `goal` and have the owner accept it.
pub async fn started(coordinator: &Coordinator, goal: &str, preferred: &[&str]) -> TaskId {
    let id = coordinator
        .delegate(goal, &tags(preferred), None)
        .await
        .expect("delegation failed");
    let task = coordinator.status(&id).await.expect("status failed");
    coordinator
        .update(
            &id,
            TaskPatch::new(&task.owner_worker).transition(TaskTransition::Accept),
        )
        .await
        .expect("accept failed");
    id
}

pub fn file_names(paths: &[PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        })
        .collect()
}
