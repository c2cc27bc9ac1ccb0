use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::Result;

pub const CONFIG_FILE: &str = "commander.toml";
pub const STATE_DIR: &str = ".commander";

/// Workspace configuration, read from `<workspace>/commander.toml`.
///
/// Paths are stored as written and resolved against the workspace root
/// on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker catalog.
    pub registry: String,
    pub ledger_dir: String,
    pub decisions_dir: String,
    /// Base directory for relative `kb_location`s. Defaults to the workspace.
    pub kb_root: Option<String>,
    pub engine: EngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            registry: "workers.toml".to_string(),
            ledger_dir: format!("{}/tasks", STATE_DIR),
            decisions_dir: format!("{}/decisions", STATE_DIR),
            kb_root: None,
            engine: EngineConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Total attempts for a conflicting ledger update, first try included.
    pub max_update_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_jitter_ms: u64,
    /// Delegated or in-progress tasks idle this long are reported as stale.
    pub stale_after_secs: u64,
    /// Escalate as soon as a worker reports a blocker.
    pub auto_escalate: bool,
    /// Capacity of the delegation event channel.
    pub event_buffer: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_update_attempts: 3,
            backoff_base_ms: 25,
            backoff_jitter_ms: 25,
            stale_after_secs: 3600,
            auto_escalate: true,
            event_buffer: 64,
        }
    }
}

impl Config {
    pub fn config_path(workspace: &Path) -> PathBuf {
        workspace.join(CONFIG_FILE)
    }

    /// Load the workspace config, falling back to defaults when absent.
    pub fn load(workspace: &Path) -> Result<Self> {
        let path = Self::config_path(workspace);
        debug!(path = %path.display(), "loading config");
        if !path.exists() {
            debug!("config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(&path)?)?;
        debug!(
            registry = %config.registry,
            ledger_dir = %config.ledger_dir,
            decisions_dir = %config.decisions_dir,
            "config loaded"
        );
        Ok(config)
    }

    pub fn save(&self, workspace: &Path) -> Result<()> {
        fs::create_dir_all(workspace)?;
        let path = Self::config_path(workspace);
        fs::write(&path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "config saved");
        Ok(())
    }

    pub fn registry_path(&self, workspace: &Path) -> PathBuf {
        resolve(workspace, &self.registry)
    }

    pub fn ledger_path(&self, workspace: &Path) -> PathBuf {
        resolve(workspace, &self.ledger_dir)
    }

    pub fn decisions_path(&self, workspace: &Path) -> PathBuf {
        resolve(workspace, &self.decisions_dir)
    }

    pub fn kb_root_path(&self, workspace: &Path) -> PathBuf {
        match &self.kb_root {
            Some(root) => resolve(workspace, root),
            None => workspace.to_path_buf(),
        }
    }
}

/// Directory for the log file and other local state.
pub fn state_dir(workspace: &Path) -> PathBuf {
    workspace.join(STATE_DIR)
}

fn resolve(workspace: &Path, path: &str) -> PathBuf {
    let expanded = expand_tilde(path);
    if expanded.is_absolute() {
        expanded
    } else {
        workspace.join(expanded)
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
