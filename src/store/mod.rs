//! Persistent store for reviews, rules, runs and results.
//!
//! The store is the single source of truth: the orchestrator keeps no
//! authoritative in-memory copy and always re-reads before terminal
//! decisions. Single-row updates are consistent; the only multi-row
//! transactions are `reset_rule_state` and `purge_rule_outputs`.

pub mod db;

pub use db::{DbHandle, ReviewDb};
