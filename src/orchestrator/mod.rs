//! Rule execution and review sequencing.
//!
//! - [`RuleExecutor`] runs one rule with retry and optional multi-run merge.
//! - [`ReviewRunner`] runs a review's rules in order and reduces the review
//!   status from its rule records.

pub mod executor;
mod merge;
pub mod retry;
pub mod runner;

pub use executor::{BuildContext, ExecutionOutcome, RuleExecutor};
pub use retry::{RetryPolicy, with_backoff};
pub use runner::{ReviewRunRequest, ReviewRunner};
