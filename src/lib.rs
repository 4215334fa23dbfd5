//! Durable execution core for multi-agent code reviews.
//!
//! A review is a list of rules run in order against one repository. Every
//! state change is written to the store as it happens, so a crashed or
//! restarted process can pick reviews back up through [`recovery`], and
//! operators can re-run failed work through [`retry_handler`].

pub mod agent;
pub mod config;
pub mod errors;
pub mod logging;
pub mod orchestrator;
pub mod prompt;
pub mod provider;
pub mod publish;
pub mod queue;
pub mod recovery;
pub mod retry_handler;
pub mod rules;
pub mod store;
pub mod task;
pub mod util;
pub mod worker;

pub use errors::ReviewError;
