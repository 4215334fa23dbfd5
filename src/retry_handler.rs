//! Manual retry of failed reviews and failed rules.
//!
//! Preconditions are checked synchronously and reported as typed errors.
//! A single-rule retry then runs on its own task so it neither waits for
//! nor holds up other rules of the same review; anything that goes wrong
//! from that point on is recorded on the rule and review rows.

use std::sync::Arc;

use reviewforge_common::{ReviewRule, ReviewStatus, RuleStatus};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::WorkspaceSection;
use crate::errors::{ReviewError, db_err};
use crate::orchestrator::{BuildContext, ReviewRunner};
use crate::provider::ProviderResolver;
use crate::queue::TaskQueue;
use crate::rules::{RuleSetLoader, SourceContext};
use crate::store::DbHandle;
use crate::task::{ReviewTask, build_recovery_task};

pub struct RetryHandler {
    db: DbHandle,
    queue: Arc<dyn TaskQueue>,
    providers: Arc<dyn ProviderResolver>,
    runner: Arc<ReviewRunner>,
    loader: Arc<RuleSetLoader>,
    workspace: WorkspaceSection,
    cancel: CancellationToken,
}

impl RetryHandler {
    pub fn new(
        db: DbHandle,
        queue: Arc<dyn TaskQueue>,
        providers: Arc<dyn ProviderResolver>,
        runner: Arc<ReviewRunner>,
        loader: Arc<RuleSetLoader>,
        workspace: WorkspaceSection,
    ) -> Self {
        Self {
            db,
            queue,
            providers,
            runner,
            loader,
            workspace,
            cancel: CancellationToken::new(),
        }
    }

    /// Detached rule retries observe this token.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Requeue a failed review from scratch.
    pub async fn retry(&self, review_id: i64) -> Result<ReviewTask, ReviewError> {
        let review = self
            .db
            .call(move |db| db.get_review(review_id))
            .await
            .map_err(db_err)?
            .ok_or_else(|| ReviewError::not_found(format!("review {}", review_id)))?;

        if review.status != ReviewStatus::Failed {
            return Err(ReviewError::validation(format!(
                "review {} is {}; only failed reviews can be retried",
                review_id, review.status
            )));
        }
        if self.queue.has_task(review_id) {
            return Err(ReviewError::validation(format!(
                "review {} is already in the queue",
                review_id
            )));
        }

        let review = self
            .db
            .call(move |db| db.reset_review_state(review_id))
            .await
            .map_err(db_err)?
            .ok_or_else(|| {
                ReviewError::validation(format!("review {} is no longer failed", review_id))
            })?;

        let task = match build_recovery_task(&review, self.providers.as_ref()) {
            Ok(task) => task,
            Err(e) => {
                let message = format!("retry failed: {}", e);
                tracing::error!(review_id, "{}", message);
                if let Err(write_err) = self
                    .db
                    .call(move |db| {
                        db.update_review_status(review_id, ReviewStatus::Failed, Some(&message), None)
                    })
                    .await
                {
                    tracing::error!(review_id, "Failed to revert review: {:#}", write_err);
                }
                return Err(e);
            }
        };

        if !self.queue.enqueue(task.clone()) {
            return Err(ReviewError::validation(format!(
                "review {} is already in the queue",
                review_id
            )));
        }
        tracing::info!(review_id, retry_count = review.retry_count, "Review requeued for retry");
        Ok(task)
    }

    /// Reset one failed rule and re-run it in the background.
    ///
    /// Returns as soon as the reset is committed; the handle resolves when
    /// the detached execution has finished.
    pub async fn retry_rule(
        &self,
        review_id: i64,
        rule_id: &str,
    ) -> Result<JoinHandle<()>, ReviewError> {
        let rid = rule_id.to_string();
        let (review, rule) = self
            .db
            .call(move |db| {
                let review = db.get_review(review_id)?;
                let rule = db.get_rule_by_review_and_rule_id(review_id, &rid)?;
                Ok((review, rule))
            })
            .await
            .map_err(db_err)?;

        if review.is_none() {
            return Err(ReviewError::not_found(format!("review {}", review_id)));
        }
        let rule = rule.ok_or_else(|| {
            ReviewError::not_found(format!("rule '{}' in review {}", rule_id, review_id))
        })?;
        if rule.status != RuleStatus::Failed {
            return Err(ReviewError::validation(format!(
                "rule '{}' of review {} is {}; only failed rules can be retried",
                rule_id, review_id, rule.status
            )));
        }

        let rule_row = rule.id;
        let reset = self
            .db
            .call(move |db| db.reset_rule_state(review_id, rule_row))
            .await
            .map_err(db_err)?;
        if !reset {
            return Err(ReviewError::validation(format!(
                "rule '{}' of review {} is no longer failed",
                rule_id, review_id
            )));
        }
        tracing::info!(review_id, rule_id, "Rule reset, dispatching retry");

        let job = RuleRetryJob {
            db: self.db.clone(),
            providers: self.providers.clone(),
            runner: self.runner.clone(),
            loader: self.loader.clone(),
            workspace: self.workspace.clone(),
            cancel: self.cancel.child_token(),
            review_id,
            rule_id: rule_id.to_string(),
        };
        Ok(tokio::spawn(job.run()))
    }
}

/// Owned state of one detached rule retry. Everything it touches is
/// re-read from the store.
struct RuleRetryJob {
    db: DbHandle,
    providers: Arc<dyn ProviderResolver>,
    runner: Arc<ReviewRunner>,
    loader: Arc<RuleSetLoader>,
    workspace: WorkspaceSection,
    cancel: CancellationToken,
    review_id: i64,
    rule_id: String,
}

impl RuleRetryJob {
    async fn run(self) {
        let review_id = self.review_id;
        let rule_id = self.rule_id.clone();

        let record = match self.load_record().await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(review_id, rule_id = %rule_id, "Rule retry aborted: {}", e);
                return;
            }
        };

        match self.execute(&record).await {
            Ok(()) | Err(ReviewError::Cancelled) => {}
            Err(e) => {
                tracing::warn!(review_id, rule_id = %rule_id, "Rule retry failed: {}", e);
                self.fail_if_running(record.id, &e.to_string()).await;
            }
        }

        if let Err(e) = self
            .runner
            .update_review_status_after_rule_execution(review_id)
            .await
        {
            tracing::error!(review_id, "Failed to update review status after rule retry: {}", e);
        }
    }

    async fn load_record(&self) -> Result<ReviewRule, ReviewError> {
        let review_id = self.review_id;
        let rule_id = self.rule_id.clone();
        self.db
            .call(move |db| db.get_rule_by_review_and_rule_id(review_id, &rule_id))
            .await
            .map_err(db_err)?
            .ok_or_else(|| ReviewError::not_found(format!("rule '{}'", self.rule_id)))
    }

    async fn execute(&self, record: &ReviewRule) -> Result<(), ReviewError> {
        let review_id = self.review_id;
        let review = self
            .db
            .call(move |db| db.get_review(review_id))
            .await
            .map_err(db_err)?
            .ok_or_else(|| ReviewError::not_found(format!("review {}", review_id)))?;

        let provider_name = self
            .providers
            .detect_from_url(&review.repo_url)
            .ok_or_else(|| {
                ReviewError::internal(format!("no provider recognises {}", review.repo_url))
            })?;
        let provider = self.providers.get(&provider_name).ok_or_else(|| {
            ReviewError::internal(format!("provider '{}' is not registered", provider_name))
        })?;
        let (owner, repo) = provider
            .parse_repo_path(&review.repo_url)
            .map_err(|e| ReviewError::internal(format!("{:#}", e)))?;
        let checkout_dir = self.workspace.checkout_dir(&owner, &repo);

        let rule_set = self
            .loader
            .load(&SourceContext {
                repo_url: review.repo_url.clone(),
                checkout_dir: checkout_dir.clone(),
            })
            .await?;
        let definition = rule_set.find(&self.rule_id).cloned().ok_or_else(|| {
            ReviewError::not_found(format!(
                "rule '{}' is not defined in the current rule set",
                self.rule_id
            ))
        })?;

        let working_dir = checkout_dir.is_dir().then_some(checkout_dir);
        let ctx = BuildContext::for_review(&review, &owner, &repo, working_dir);
        self.runner
            .execute_single_rule(
                &self.cancel,
                &definition,
                &ctx,
                record,
                record.rule_index.max(0) as usize,
                true,
                &provider_name,
            )
            .await
            .map(|_| ())
    }

    /// Record a failure that happened before the executor could.
    async fn fail_if_running(&self, rule_row: i64, message: &str) {
        let message = message.to_string();
        let result = self
            .db
            .call(move |db| {
                if let Some(rule) = db.get_review_rule(rule_row)?
                    && rule.status == RuleStatus::Running
                {
                    db.finish_rule(rule_row, RuleStatus::Failed, 0, Some(&message), 0)?;
                }
                Ok(())
            })
            .await;
        if let Err(e) = result {
            tracing::error!(rule_row, "Failed to record rule retry failure: {:#}", e);
        }
    }
}
