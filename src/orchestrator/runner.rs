//! Sequences a review's rules and reconciles the review status.
//!
//! Rules run strictly in declared order. A failing rule is recorded and the
//! loop moves on; only after the whole list has been attempted does the
//! runner report that something failed. The review status is always derived
//! from the rule rows as they are in the store, never from what this loop
//! last saw, because a single-rule retry may be writing a sibling row
//! concurrently.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use reviewforge_common::{Review, ReviewRule, ReviewStatus, RuleStatus};
use tokio_util::sync::CancellationToken;

use super::executor::{BuildContext, ExecutionOutcome, RuleExecutor};
use crate::errors::{ReviewError, db_err};
use crate::publish::{OutputPublisher, PublishContext};
use crate::rules::RuleDefinition;
use crate::store::DbHandle;

/// Rules to run plus the context they are rendered against.
#[derive(Debug, Clone)]
pub struct ReviewRunRequest {
    pub rules: Vec<RuleDefinition>,
    pub context: BuildContext,
}

pub struct ReviewRunner {
    db: DbHandle,
    executor: Arc<RuleExecutor>,
    publisher: Arc<dyn OutputPublisher>,
}

impl ReviewRunner {
    pub fn new(db: DbHandle, executor: Arc<RuleExecutor>, publisher: Arc<dyn OutputPublisher>) -> Self {
        Self {
            db,
            executor,
            publisher,
        }
    }

    /// Run every rule of `review` in order, resuming where a previous pass
    /// stopped. Returns the last produced outcome, or `RulesFailed` once all
    /// rules were attempted and at least one failed.
    pub async fn run_review_with_tracking(
        &self,
        cancel: &CancellationToken,
        request: &ReviewRunRequest,
        review: &Review,
        provider: &str,
    ) -> Result<Option<ExecutionOutcome>, ReviewError> {
        let review_id = review.id;
        let ids: Vec<String> = request.rules.iter().map(|r| r.id.clone()).collect();
        tracing::info!(review_id, rules = ids.len(), provider, "Starting review");

        let (existing, records) = self
            .db
            .call(move |db| {
                db.mark_review_running(review_id)?;
                let dropped = db.delete_stale_pending_rules(review_id, &ids)?;
                if dropped > 0 {
                    tracing::info!(review_id, dropped, "Dropped pending rules missing from the rule set");
                }
                let existing = db.get_rules_by_review_id(review_id)?;
                let mut records = Vec::with_capacity(ids.len());
                for (index, rule_id) in ids.iter().enumerate() {
                    records.push(db.ensure_review_rule(review_id, rule_id, index as i32)?);
                }
                Ok((existing, records))
            })
            .await
            .map_err(db_err)?;

        // Status each rule had before this pass started.
        let prior: HashMap<String, RuleStatus> = existing
            .into_iter()
            .map(|r| (r.rule_id, r.status))
            .collect();

        let mut last = None;
        let mut failures = Vec::new();

        for (index, (rule, record)) in request.rules.iter().zip(&records).enumerate() {
            if cancel.is_cancelled() {
                return Err(ReviewError::Cancelled);
            }

            if prior.get(&rule.id) == Some(&RuleStatus::Completed)
                && !self.should_force_rerun(rule, record)
            {
                tracing::info!(review_id, rule_id = %rule.id, "Rule already completed, skipping");
                continue;
            }

            match self
                .execute_single_rule(cancel, rule, &request.context, record, index, false, provider)
                .await
            {
                Ok(outcome) => last = Some(outcome),
                Err(ReviewError::Cancelled) => return Err(ReviewError::Cancelled),
                Err(e) => failures.push(format!("{}: {}", rule.id, e)),
            }

            if let Err(e) = self.update_review_status_after_rule_execution(review_id).await {
                tracing::error!(review_id, "Failed to update review status: {}", e);
            }
        }

        let status = self.update_review_status_after_rule_execution(review_id).await?;
        tracing::info!(review_id, status = %status, failed = failures.len(), "Review pass finished");

        if failures.is_empty() {
            Ok(last)
        } else {
            Err(ReviewError::RulesFailed {
                failed: failures.len(),
                total: request.rules.len(),
                summary: failures.join("; "),
            })
        }
    }

    /// Reserved hook for forcing completed rules to run again.
    fn should_force_rerun(&self, _rule: &RuleDefinition, _record: &ReviewRule) -> bool {
        false
    }

    /// Execute one rule against its tracking record.
    ///
    /// Stale outputs are purged first: everything when the rule previously
    /// failed or `explicit_retry` is set, and only unfinished runs when the
    /// rule is being resumed from `running`. The resulting payload is stored
    /// as a review result and published.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute_single_rule(
        &self,
        cancel: &CancellationToken,
        rule: &RuleDefinition,
        ctx: &BuildContext,
        record: &ReviewRule,
        rule_index: usize,
        explicit_retry: bool,
        provider: &str,
    ) -> Result<ExecutionOutcome, ReviewError> {
        let record_id = record.id;
        let fresh = self
            .db
            .call(move |db| db.get_review_rule(record_id))
            .await
            .map_err(db_err)?
            .ok_or_else(|| ReviewError::not_found(format!("review rule {}", record_id)))?;

        let purge_all = match fresh.status {
            _ if explicit_retry => Some(true),
            RuleStatus::Failed => Some(true),
            RuleStatus::Running => Some(false),
            _ => None,
        };
        if let Some(all_runs) = purge_all {
            tracing::debug!(
                review_id = fresh.review_id,
                rule_id = %rule.id,
                all_runs,
                "Purging stale rule outputs"
            );
            self.db
                .call(move |db| db.purge_rule_outputs(record_id, all_runs))
                .await
                .map_err(db_err)?;
        }

        let outcome = self
            .executor
            .execute_rule(cancel, rule, ctx, Some(&fresh), rule_index)
            .await?;

        if let Some(payload) = outcome.payload().cloned() {
            let review_id = fresh.review_id;
            self.db
                .call(move |db| db.create_review_result(review_id, record_id, &payload))
                .await
                .map_err(db_err)?;
        }

        self.publish(provider, ctx, rule, &outcome).await;
        Ok(outcome)
    }

    async fn publish(
        &self,
        provider: &str,
        ctx: &BuildContext,
        rule: &RuleDefinition,
        outcome: &ExecutionOutcome,
    ) {
        let publish_ctx = PublishContext {
            review_id: ctx.request.review_id,
            provider: provider.to_string(),
            repo_url: ctx.request.repo_url.clone(),
            pr_number: ctx.request.pr_number,
            rule_id: rule.id.clone(),
            channels: rule
                .output
                .as_ref()
                .map(|o| o.channels.clone())
                .unwrap_or_default(),
        };
        if let Err(e) = self.publisher.publish(&publish_ctx, outcome).await {
            tracing::warn!(
                review_id = publish_ctx.review_id,
                rule_id = %rule.id,
                "Failed to publish rule output: {:#}",
                e
            );
        }
    }

    /// Re-read the review and all of its rules and apply the status reducer.
    /// Writing only happens when the status actually changes.
    pub async fn update_review_status_after_rule_execution(
        &self,
        review_id: i64,
    ) -> Result<ReviewStatus, ReviewError> {
        self.db
            .call(move |db| {
                let review = db
                    .get_review(review_id)?
                    .with_context(|| format!("Review {} not found", review_id))?;
                let rules = db.get_rules_by_review_id(review_id)?;

                let Some((status, error)) = reduce_review_status(&rules) else {
                    return Ok(review.status);
                };
                if review.status == status {
                    return Ok(status);
                }

                let duration = review
                    .started_at
                    .map(|started| (Utc::now() - started).num_milliseconds());
                db.update_review_status(review_id, status, error.as_deref(), duration)?;
                tracing::info!(review_id, from = %review.status, to = %status, "Review status changed");
                Ok(status)
            })
            .await
            .map_err(db_err)
    }
}

/// Target review status for a set of rule rows, or `None` while any rule is
/// still pending or running.
///
/// A `pending` row whose rule has left the rule set would block forever;
/// `run_review_with_tracking` deletes those rows before each pass.
pub fn reduce_review_status(rules: &[ReviewRule]) -> Option<(ReviewStatus, Option<String>)> {
    if rules
        .iter()
        .any(|r| matches!(r.status, RuleStatus::Running | RuleStatus::Pending))
    {
        return None;
    }
    if rules.iter().all(|r| r.status == RuleStatus::Completed) {
        return Some((ReviewStatus::Completed, None));
    }
    let summary = rules
        .iter()
        .filter(|r| r.status == RuleStatus::Failed)
        .map(|r| {
            format!(
                "{}: {}",
                r.rule_id,
                r.error_message.as_deref().unwrap_or("failed")
            )
        })
        .collect::<Vec<_>>()
        .join("; ");
    Some((ReviewStatus::Failed, Some(summary)))
}
