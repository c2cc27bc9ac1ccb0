//! Orchestration layer: goal routing, escalation, and the coordinator
//! entry point.
//!
//! The `DelegationEngine` owns every task transition it drives and is the
//! only layer that retries ledger conflicts. The `Coordinator` wires the
//! engine to a workspace and exposes the operations the CLI calls.

mod coordinator;
mod engine;
mod keywords;

pub use coordinator::{describe_error, Coordinator};
pub use engine::{DelegationEngine, DelegationEvent, ENGINE_AUTHOR};
pub use keywords::extract_keywords;
