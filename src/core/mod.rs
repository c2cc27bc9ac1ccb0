//! Core domain models for the delegation core.
//!
//! Tasks are the tracked units of delegated work; decisions are the
//! immutable record of judgment calls made while orchestrating them.

pub mod decision;
pub mod task;

pub use decision::{Decision, DecisionId, DecisionStatus};
pub use task::{ChecklistItem, LogEntry, Task, TaskId, TaskPatch, TaskStatus, TaskTransition};
