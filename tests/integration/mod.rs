//! Integration test suite for commander.
//!
//! These tests drive a real workspace on disk through the `Coordinator`:
//! worker catalog, knowledge base, task ledger and decision log.
//!
//! # Test Categories
//!
//! - `delegation`: worker selection and hand-off
//! - `escalation`: blocked tasks, re-delegation and manual intervention
//! - `ledger_concurrency`: concurrent writers against one task
//! - `decisions`: decision log status rules and supersession
//! - `lifecycle_properties`: random transition sequences against the ledger

mod fixtures;

mod decisions;
mod delegation;
mod escalation;
mod ledger_concurrency;
