//! Structured logging for debugging commander.
//!
//! Events are written with `tracing` throughout the crate and collected
//! here into `<workspace>/.commander/commander.log`, so CLI stdout stays
//! clean for command output.
//!
//! Levels:
//! - ERROR: operations that could not complete
//! - WARN: conflicts, unavailable knowledge bases, dropped events
//! - INFO: delegations, escalations, decisions
//! - DEBUG: ledger reads and writes, retries, config
//!
//! Debug mode can be enabled with the `--debug` flag or `COMMANDER_DEBUG=1`.
//! `RUST_LOG` overrides the filter entirely.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::state_dir;
use crate::Result;

pub const LOG_FILE: &str = "commander.log";
pub const DEBUG_ENV: &str = "COMMANDER_DEBUG";

static LOG_PATH: OnceLock<PathBuf> = OnceLock::new();

/// Whether debug output was requested by flag or environment.
pub fn debug_requested(flag: bool) -> bool {
    flag || std::env::var(DEBUG_ENV)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn filter(debug: bool) -> EnvFilter {
    let level = if debug { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("warn,commander={}", level)))
}

/// Initialize logging for the current directory's workspace.
pub fn init_with_debug(debug: bool) -> Result<()> {
    let workspace = std::env::current_dir()?;
    init_at(&workspace, debug)
}

/// Install the global subscriber writing to the workspace log file.
///
/// The file is truncated on the first call. Later calls are no-ops and
/// return `Ok`, as does losing the race against another installed
/// subscriber.
pub fn init_at(workspace: &Path, debug: bool) -> Result<()> {
    if LOG_PATH.get().is_some() {
        return Ok(());
    }

    let dir = state_dir(workspace);
    fs::create_dir_all(&dir)?;
    let path = dir.join(LOG_FILE);
    let file = File::create(&path)?;

    let layer = fmt::layer()
        .with_ansi(false)
        .with_target(false)
        .with_writer(Mutex::new(file))
        .with_filter(filter(debug_requested(debug)));
    if tracing_subscriber::registry().with(layer).try_init().is_ok() {
        let _ = LOG_PATH.set(path);
    }
    Ok(())
}

/// Path of the active log file, once logging is initialized.
pub fn log_path() -> Option<&'static Path> {
    LOG_PATH.get().map(PathBuf::as_path)
}
