//! Startup recovery of in-flight reviews.
//!
//! Every review left `pending` or `running` by a previous process is either
//! evicted (marked `failed` with the reason) or rebuilt into a task and put
//! back on the queue. Per-review problems never abort recovery.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use reviewforge_common::{Review, ReviewStatus};

use crate::config::RecoverySection;
use crate::errors::{ReviewError, db_err};
use crate::provider::ProviderResolver;
use crate::queue::TaskQueue;
use crate::store::DbHandle;
use crate::task::build_recovery_task;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryDecision {
    Recover,
    Evict(String),
}

/// What a recovery pass did, by review id.
#[derive(Debug, Default, Clone)]
pub struct RecoveryReport {
    pub scanned: usize,
    pub enqueued_pending: Vec<i64>,
    pub enqueued_running: Vec<i64>,
    pub already_queued: Vec<i64>,
    pub evicted: Vec<(i64, String)>,
    pub failed: Vec<(i64, String)>,
}

pub struct RecoveryService {
    db: DbHandle,
    queue: Arc<dyn TaskQueue>,
    providers: Arc<dyn ProviderResolver>,
    policy: RecoverySection,
}

impl RecoveryService {
    pub fn new(
        db: DbHandle,
        queue: Arc<dyn TaskQueue>,
        providers: Arc<dyn ProviderResolver>,
        policy: RecoverySection,
    ) -> Self {
        Self {
            db,
            queue,
            providers,
            policy,
        }
    }

    /// Eviction policy: retry ceiling first, then the wall-clock budget of
    /// a running review.
    pub fn should_recover(&self, review: &Review, now: DateTime<Utc>) -> RecoveryDecision {
        if review.retry_count >= self.policy.max_retry_count {
            return RecoveryDecision::Evict(format!(
                "max retry count exceeded ({}/{})",
                review.retry_count, self.policy.max_retry_count
            ));
        }
        if review.status == ReviewStatus::Running
            && let Some(started) = review.started_at
        {
            let budget = Duration::hours(self.policy.task_timeout_hours);
            let elapsed = now - started;
            if elapsed > budget {
                return RecoveryDecision::Evict(format!(
                    "task timeout: running for {}h, limit {}h",
                    elapsed.num_hours(),
                    self.policy.task_timeout_hours
                ));
            }
        }
        RecoveryDecision::Recover
    }

    pub async fn recover_to_queue(&self) -> Result<RecoveryReport, ReviewError> {
        let reviews = self
            .db
            .call(|db| db.list_pending_or_running())
            .await
            .map_err(db_err)?;

        let mut report = RecoveryReport {
            scanned: reviews.len(),
            ..Default::default()
        };
        let now = Utc::now();
        tracing::info!(count = reviews.len(), "Recovering in-flight reviews");

        for review in reviews {
            let review_id = review.id;
            match self.should_recover(&review, now) {
                RecoveryDecision::Evict(reason) => {
                    tracing::warn!(review_id, reason = %reason, "Evicting review");
                    self.mark_failed(review_id, &reason).await;
                    report.evicted.push((review_id, reason));
                }
                RecoveryDecision::Recover => {
                    let task = match build_recovery_task(&review, self.providers.as_ref()) {
                        Ok(task) => task,
                        Err(e) => {
                            let reason = e.to_string();
                            tracing::error!(review_id, "Failed to rebuild task: {}", reason);
                            self.mark_failed(review_id, &reason).await;
                            report.failed.push((review_id, reason));
                            continue;
                        }
                    };

                    let running = review.status == ReviewStatus::Running;
                    let accepted = if running {
                        self.queue.enqueue_as_running(task)
                    } else {
                        self.queue.enqueue(task)
                    };

                    if !accepted {
                        tracing::info!(review_id, "Review already queued");
                        report.already_queued.push(review_id);
                    } else if running {
                        tracing::info!(review_id, "Re-enqueued running review");
                        report.enqueued_running.push(review_id);
                    } else {
                        tracing::info!(review_id, "Re-enqueued pending review");
                        report.enqueued_pending.push(review_id);
                    }
                }
            }
        }

        Ok(report)
    }

    async fn mark_failed(&self, review_id: i64, reason: &str) {
        let message = format!("recovery failed: {}", reason);
        let result = self
            .db
            .call(move |db| db.update_review_status(review_id, ReviewStatus::Failed, Some(&message), None))
            .await;
        if let Err(e) = result {
            tracing::error!(review_id, "Failed to mark review failed: {:#}", e);
        }
    }
}
