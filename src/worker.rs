//! Drains the review queue with a fixed number of concurrent loops.
//!
//! Each loop takes one task at a time, resolves the rule set when the task
//! does not carry one, and hands the review to the runner. The queue keeps
//! reviews of the same repository from running side by side.

use std::sync::Arc;
use std::time::Duration;

use reviewforge_common::{Review, ReviewStatus};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::WorkspaceSection;
use crate::errors::{ReviewError, db_err};
use crate::orchestrator::{BuildContext, ReviewRunRequest, ReviewRunner};
use crate::queue::MemoryTaskQueue;
use crate::rules::{RuleSet, RuleSetLoader, SourceContext};
use crate::store::DbHandle;
use crate::task::ReviewTask;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Totals for one `run` of the pool.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub processed: usize,
    pub completed: usize,
    pub failed: usize,
}

impl WorkerReport {
    fn merge(&mut self, other: WorkerReport) {
        self.processed += other.processed;
        self.completed += other.completed;
        self.failed += other.failed;
    }
}

pub struct WorkerPool {
    db: DbHandle,
    queue: Arc<MemoryTaskQueue>,
    runner: Arc<ReviewRunner>,
    loader: Arc<RuleSetLoader>,
    workspace: WorkspaceSection,
    concurrency: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    pub fn new(
        db: DbHandle,
        queue: Arc<MemoryTaskQueue>,
        runner: Arc<ReviewRunner>,
        loader: Arc<RuleSetLoader>,
        workspace: WorkspaceSection,
        concurrency: usize,
    ) -> Self {
        Self {
            db,
            queue,
            runner,
            loader,
            workspace,
            concurrency: concurrency.max(1),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Process tasks until the queue is idle or `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) -> WorkerReport {
        let mut set = JoinSet::new();
        for worker in 0..self.concurrency {
            let pool = self.clone();
            let cancel = cancel.clone();
            set.spawn(async move { pool.worker_loop(worker, cancel).await });
        }

        let mut report = WorkerReport::default();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(partial) => report.merge(partial),
                Err(e) => tracing::error!("Worker task panicked: {}", e),
            }
        }
        tracing::info!(
            processed = report.processed,
            completed = report.completed,
            failed = report.failed,
            "Workers finished"
        );
        report
    }

    async fn worker_loop(&self, worker: usize, cancel: CancellationToken) -> WorkerReport {
        let mut report = WorkerReport::default();
        loop {
            if cancel.is_cancelled() {
                break;
            }
            let Some(task) = self.queue.dequeue() else {
                if self.queue.is_idle() {
                    break;
                }
                // Remaining tasks wait on a repository another loop holds.
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(self.poll_interval) => continue,
                }
            };

            let review_id = task.review_id;
            tracing::debug!(worker, review_id, task_id = %task.id, "Picked up task");
            report.processed += 1;
            match self.process(&cancel, &task).await {
                Ok(()) => report.completed += 1,
                Err(ReviewError::Cancelled) => {
                    tracing::info!(review_id, "Review interrupted, left for recovery");
                }
                Err(e) => {
                    tracing::warn!(review_id, "Review finished with errors: {}", e);
                    report.failed += 1;
                }
            }
            self.queue.complete(review_id);
        }
        report
    }

    async fn process(&self, cancel: &CancellationToken, task: &ReviewTask) -> Result<(), ReviewError> {
        let review_id = task.review_id;
        let review = self
            .db
            .call(move |db| db.get_review(review_id))
            .await
            .map_err(db_err)?
            .ok_or_else(|| ReviewError::not_found(format!("review {}", review_id)))?;

        let checkout_dir = self.workspace.checkout_dir(&task.owner, &task.repo);
        let rule_set = match &task.rules {
            Some(rules) => rules.clone(),
            None => match self.load_rules(task, &checkout_dir).await {
                Ok(rules) => rules,
                Err(e) => {
                    self.fail_review(&review, &format!("rule set unavailable: {}", e))
                        .await;
                    return Err(e);
                }
            },
        };

        let working_dir = checkout_dir.is_dir().then_some(checkout_dir);
        let request = ReviewRunRequest {
            rules: rule_set.rules,
            context: BuildContext::for_review(&review, &task.owner, &task.repo, working_dir),
        };
        self.runner
            .run_review_with_tracking(cancel, &request, &review, &task.provider)
            .await
            .map(|_| ())
    }

    async fn load_rules(
        &self,
        task: &ReviewTask,
        checkout_dir: &std::path::Path,
    ) -> Result<RuleSet, ReviewError> {
        self.loader
            .load(&SourceContext {
                repo_url: task.repo_url().to_string(),
                checkout_dir: checkout_dir.to_path_buf(),
            })
            .await
    }

    async fn fail_review(&self, review: &Review, message: &str) {
        let review_id = review.id;
        let message = message.to_string();
        let result = self
            .db
            .call(move |db| db.update_review_status(review_id, ReviewStatus::Failed, Some(&message), None))
            .await;
        if let Err(e) = result {
            tracing::error!(review_id, "Failed to mark review failed: {:#}", e);
        }
    }
}
