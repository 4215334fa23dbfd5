//! Shared domain types for the reviewforge orchestrator.
//!
//! The persisted records (`Review`, `ReviewRule`, `ReviewRuleRun`,
//! `ReviewResult`) live in [`models`]; the uniform agent capability that every
//! analysis tool implements lives in [`agent`].

pub mod agent;
pub mod models;

pub use agent::{Agent, AgentError, AgentErrorKind, AgentRequest, AgentResult};
pub use models::{
    Review, ReviewResult, ReviewRule, ReviewRuleRun, ReviewStatus, RuleRunStatus, RuleStatus,
    findings_count,
};
