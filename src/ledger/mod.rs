//! Durable task ledger.
//!
//! Task records are Markdown files with TOML front matter, one per task,
//! so they stay diffable and can be audited by hand. All mutation goes
//! through [`TaskLedger::update`], which enforces optimistic concurrency
//! and the task state machine.

mod codec;
mod store;

pub use codec::{decode, encode, is_writable_author};
pub use store::{verify_mutation, TaskLedger};
