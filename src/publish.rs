//! Output channels a completed rule is published to.
//!
//! Publication is best effort: a failing publisher is logged by the caller
//! and never turns a completed rule into a failed one.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::orchestrator::ExecutionOutcome;

#[derive(Debug, Clone)]
pub struct PublishContext {
    pub review_id: i64,
    pub provider: String,
    pub repo_url: String,
    pub pr_number: Option<i64>,
    pub rule_id: String,
    pub channels: Vec<String>,
}

#[async_trait]
pub trait OutputPublisher: Send + Sync {
    async fn publish(&self, ctx: &PublishContext, outcome: &ExecutionOutcome) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PublishMessage {
    RuleCompleted {
        review_id: i64,
        rule_id: String,
        provider: String,
        repo_url: String,
        pr_number: Option<i64>,
        channels: Vec<String>,
        findings_count: i32,
        merged: bool,
        text: String,
        data: Option<serde_json::Value>,
    },
}

impl PublishMessage {
    pub fn rule_completed(ctx: &PublishContext, outcome: &ExecutionOutcome) -> Self {
        Self::RuleCompleted {
            review_id: ctx.review_id,
            rule_id: ctx.rule_id.clone(),
            provider: ctx.provider.clone(),
            repo_url: ctx.repo_url.clone(),
            pr_number: ctx.pr_number,
            channels: ctx.channels.clone(),
            findings_count: outcome.findings_count(),
            merged: outcome.merged,
            text: outcome.text.clone(),
            data: outcome.data.clone(),
        }
    }
}

/// Sends each message as JSON over a broadcast channel.
pub struct BroadcastPublisher {
    tx: broadcast::Sender<String>,
}

impl BroadcastPublisher {
    pub fn new(tx: broadcast::Sender<String>) -> Self {
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl OutputPublisher for BroadcastPublisher {
    async fn publish(&self, ctx: &PublishContext, outcome: &ExecutionOutcome) -> Result<()> {
        let json = serde_json::to_string(&PublishMessage::rule_completed(ctx, outcome))?;
        // No receivers is not an error.
        let _ = self.tx.send(json);
        Ok(())
    }
}

/// Writes a one-line summary to the log.
pub struct LogPublisher;

#[async_trait]
impl OutputPublisher for LogPublisher {
    async fn publish(&self, ctx: &PublishContext, outcome: &ExecutionOutcome) -> Result<()> {
        tracing::info!(
            review_id = ctx.review_id,
            rule_id = %ctx.rule_id,
            channels = ?ctx.channels,
            findings = outcome.findings_count(),
            merged = outcome.merged,
            "Rule output published"
        );
        Ok(())
    }
}
