pub mod config;
pub mod core;
pub mod decisions;
pub mod error;
pub mod knowledge;
pub mod ledger;
pub mod log;
pub mod orchestration;
pub mod record;
pub mod registry;
pub mod util;

pub use crate::core::{
    ChecklistItem, Decision, DecisionId, DecisionStatus, LogEntry, Task, TaskId, TaskPatch,
    TaskStatus, TaskTransition,
};
pub use error::{Error, Result};
pub use orchestration::{describe_error, Coordinator, DelegationEngine, DelegationEvent};
