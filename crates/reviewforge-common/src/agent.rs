//! The uniform capability every analysis agent implements.
//!
//! The orchestrator never knows which tool sits behind an agent; it builds an
//! [`AgentRequest`], hands over the rendered prompt text, and classifies the
//! returned [`AgentError`] as retryable or not.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Everything an agent needs to know about the unit of work besides the prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentRequest {
    pub review_id: i64,
    pub rule_id: String,
    pub repo_url: String,
    pub ref_name: String,
    #[serde(default)]
    pub commit_sha: Option<String>,
    #[serde(default)]
    pub pr_number: Option<i64>,
    /// Checkout the agent should run in, when one exists.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Model override for this invocation. `None` means the agent default.
    #[serde(default)]
    pub model: Option<String>,
    /// Slot index when the request belongs to a multi-run rule.
    #[serde(default)]
    pub run_index: Option<u32>,
}

impl AgentRequest {
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    pub fn with_run_index(mut self, index: u32) -> Self {
        self.run_index = Some(index);
        self
    }
}

/// Output of one agent invocation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    pub text: String,
    /// Structured payload, typically `{"findings": [...], "summary": "..."}`.
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub model: Option<String>,
}

impl AgentResult {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            success: true,
            text: text.into(),
            data: None,
            model: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// A result is empty when it carries neither text nor a payload.
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.data.as_ref().is_none_or(|d| d.is_null())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentErrorKind {
    /// Transient failure (network, rate limit, crash). Retried with backoff.
    Retryable,
    /// Permanent failure (authentication, bad invocation). Never retried.
    NonRetryable,
}

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct AgentError {
    pub kind: AgentErrorKind,
    pub message: String,
}

impl AgentError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: AgentErrorKind::Retryable,
            message: message.into(),
        }
    }

    pub fn non_retryable(message: impl Into<String>) -> Self {
        Self {
            kind: AgentErrorKind::NonRetryable,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == AgentErrorKind::Retryable
    }
}

/// An external analysis capability.
///
/// Implementations must abort promptly once `cancel` fires.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn available(&self) -> bool;

    async fn execute_with_prompt(
        &self,
        cancel: &CancellationToken,
        request: &AgentRequest,
        prompt: &str,
    ) -> Result<AgentResult, AgentError>;
}
