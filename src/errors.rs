//! Typed error hierarchy for the review orchestrator.
//!
//! `ReviewError` is what the public entry points (`execute_rule`,
//! `run_review_with_tracking`, `recover_to_queue`, `retry`, `retry_rule`)
//! return. Store and config plumbing uses `anyhow` internally and is wrapped
//! into `Database` / `Other` at the boundary.

use reviewforge_common::AgentError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReviewError {
    /// The rule names no agent, or the named agent is not registered.
    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Retryable execution error: {0}")]
    RetryableExecution(String),

    #[error("Non-retryable execution error: {0}")]
    NonRetryableExecution(String),

    /// Illegal state transition requested by a caller.
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("All {total} runs failed: {errors}")]
    AllRunsFailed { total: usize, errors: String },

    /// Loop-level signal that at least one rule of a review failed.
    #[error("{failed} of {total} rules failed: {summary}")]
    RulesFailed {
        failed: usize,
        total: usize,
        summary: String,
    },

    #[error("Database error: {0:#}")]
    Database(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ReviewError {
    /// Whether the retry loop may try the failed operation again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RetryableExecution(_))
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl From<AgentError> for ReviewError {
    fn from(err: AgentError) -> Self {
        if err.is_retryable() {
            Self::RetryableExecution(err.message)
        } else {
            Self::NonRetryableExecution(err.message)
        }
    }
}

/// Shorthand for wrapping store failures.
pub(crate) fn db_err(err: anyhow::Error) -> ReviewError {
    ReviewError::Database(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_error_maps_to_execution_variants() {
        let retryable: ReviewError = AgentError::retryable("rate limited").into();
        assert!(matches!(retryable, ReviewError::RetryableExecution(ref m) if m == "rate limited"));
        assert!(retryable.is_retryable());

        let fatal: ReviewError = AgentError::non_retryable("bad token").into();
        assert!(matches!(fatal, ReviewError::NonRetryableExecution(_)));
        assert!(!fatal.is_retryable());
    }

    #[test]
    fn only_retryable_execution_is_retryable() {
        assert!(!ReviewError::AgentNotFound("x".into()).is_retryable());
        assert!(!ReviewError::Cancelled.is_retryable());
        assert!(!ReviewError::internal("boom").is_retryable());
    }

    #[test]
    fn validation_message_is_preserved() {
        let err = ReviewError::validation("review 7 is already in the queue");
        assert!(err.to_string().contains("already in the queue"));
    }

    #[test]
    fn rules_failed_carries_counts() {
        let err = ReviewError::RulesFailed {
            failed: 2,
            total: 5,
            summary: "a; b".into(),
        };
        match &err {
            ReviewError::RulesFailed { failed, total, .. } => {
                assert_eq!(*failed, 2);
                assert_eq!(*total, 5);
            }
            _ => panic!("Expected RulesFailed"),
        }
        assert!(err.to_string().starts_with("2 of 5 rules failed"));
    }

    #[test]
    fn database_error_wraps_anyhow() {
        let err = db_err(anyhow::anyhow!("disk full"));
        assert!(matches!(err, ReviewError::Database(_)));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&ReviewError::Cancelled);
        assert_std_error(&ReviewError::AllRunsFailed {
            total: 2,
            errors: "x".into(),
        });
    }
}
