//! End-to-end behaviour of execution, recovery and retry against an
//! in-memory store and scripted agents.

mod common;

use std::time::Duration;

use chrono::Utc;
use common::{FINDINGS_JSON, GatedAgent, Harness, ScriptedAgent};
use reviewforge::ReviewError;
use reviewforge::config::RecoverySection;
use reviewforge::orchestrator::ReviewRunRequest;
use reviewforge::provider::ProviderRegistry;
use reviewforge::queue::TaskQueue;
use reviewforge::rules::{MultiRunConfig, RuleDefinition, RuleSet};
use reviewforge::task::build_recovery_task;
use reviewforge_common::{AgentError, AgentResult, ReviewStatus, RuleRunStatus, RuleStatus};
use tokio_util::sync::CancellationToken;

fn rule(id: &str, agent: &str) -> RuleDefinition {
    RuleDefinition::new(id, agent, "Review {{repo}} at {{ref}} for {{rule_id}}")
}

fn multi(runs: u32, models: &[&str]) -> MultiRunConfig {
    MultiRunConfig {
        enabled: true,
        runs: Some(runs),
        models: models.iter().map(|m| m.to_string()).collect(),
        merge_model: Some("merger".to_string()),
    }
}

// =============================================================================
// Executor
// =============================================================================

mod executor {
    use super::*;

    #[tokio::test]
    async fn test_transient_failures_are_retried_until_success() {
        let agent = ScriptedAgent::new(
            "fake",
            vec![
                Err(AgentError::retryable("rate limited")),
                Err(AgentError::retryable("connection reset")),
            ],
        );
        let h = Harness::new(vec![agent.clone()], 3);
        let review = h.create_review();
        let record = h
            .db
            .lock_sync()
            .unwrap()
            .ensure_review_rule(review.id, "security", 0)
            .unwrap();

        let outcome = h
            .executor
            .execute_rule(
                &CancellationToken::new(),
                &rule("security", "fake"),
                &h.context(&review),
                Some(&record),
                0,
            )
            .await
            .unwrap();

        assert_eq!(agent.calls(), 3);
        assert_eq!(outcome.findings_count(), 1);
        let stored = h.db.lock_sync().unwrap().get_review_rule(record.id).unwrap().unwrap();
        assert_eq!(stored.status, RuleStatus::Completed);
        assert_eq!(stored.findings_count, 1);
        assert!(stored.completed_at.is_some());
        assert!(stored.duration_ms.is_some());
        assert_eq!(
            stored.prompt.as_deref(),
            Some("Review app at main for security")
        );
    }

    #[tokio::test]
    async fn test_retry_budget_is_max_retries_plus_one() {
        let agent = ScriptedAgent::new(
            "fake",
            (0..10).map(|_| Err(AgentError::retryable("down"))).collect(),
        );
        let h = Harness::new(vec![agent.clone()], 3);
        let review = h.create_review();

        let err = h
            .executor
            .execute_rule(
                &CancellationToken::new(),
                &rule("security", "fake"),
                &h.context(&review),
                None,
                0,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ReviewError::RetryableExecution(_)));
        assert_eq!(agent.calls(), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_failure_short_circuits() {
        let agent = ScriptedAgent::new("fake", vec![Err(AgentError::non_retryable("401 unauthorized"))]);
        let h = Harness::new(vec![agent.clone()], 3);
        let review = h.create_review();
        let record = h
            .db
            .lock_sync()
            .unwrap()
            .ensure_review_rule(review.id, "security", 0)
            .unwrap();

        let err = h
            .executor
            .execute_rule(
                &CancellationToken::new(),
                &rule("security", "fake"),
                &h.context(&review),
                Some(&record),
                0,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ReviewError::NonRetryableExecution(_)));
        assert_eq!(agent.calls(), 1);
        let stored = h.db.lock_sync().unwrap().get_review_rule(record.id).unwrap().unwrap();
        assert_eq!(stored.status, RuleStatus::Failed);
        assert!(stored.error_message.unwrap().contains("401 unauthorized"));
    }

    #[tokio::test]
    async fn test_unknown_agent_is_not_retried() {
        let agent = ScriptedAgent::new("fake", vec![]);
        let h = Harness::new(vec![agent.clone()], 3);
        let review = h.create_review();

        let err = h
            .executor
            .execute_rule(
                &CancellationToken::new(),
                &rule("security", "missing"),
                &h.context(&review),
                None,
                0,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ReviewError::AgentNotFound(_)));
        assert_eq!(agent.calls(), 0);
    }

    #[tokio::test]
    async fn test_single_run_multi_config_never_merges() {
        let agent = ScriptedAgent::new("fake", vec![Ok(AgentResult::text("only run output"))]);
        let h = Harness::new(vec![agent.clone()], 0);
        let review = h.create_review();
        let single = rule("security", "fake").with_multi_run(multi(1, &["m1"]));

        let outcome = h
            .executor
            .execute_rule(&CancellationToken::new(), &single, &h.context(&review), None, 0)
            .await
            .unwrap();

        assert_eq!(outcome.text, "only run output");
        assert!(!outcome.merged);
        assert_eq!(agent.calls(), 1);
        assert_eq!(agent.merge_calls(), 0);
    }

    #[tokio::test]
    async fn test_failed_merge_falls_back_to_first_success() {
        let agent = ScriptedAgent::new(
            "fake",
            vec![
                Ok(AgentResult::text("first run")),
                Ok(AgentResult::text("second run")),
                Err(AgentError::non_retryable("merge exploded")),
            ],
        );
        let h = Harness::new(vec![agent.clone()], 0);
        let review = h.create_review();
        let record = h
            .db
            .lock_sync()
            .unwrap()
            .ensure_review_rule(review.id, "security", 0)
            .unwrap();
        let multi_rule = rule("security", "fake").with_multi_run(multi(2, &["a", "b"]));

        let outcome = h
            .executor
            .execute_rule(
                &CancellationToken::new(),
                &multi_rule,
                &h.context(&review),
                Some(&record),
                0,
            )
            .await
            .unwrap();

        assert_eq!(outcome.text, "first run");
        assert!(!outcome.merged);
        assert_eq!(agent.merge_calls(), 1);
        let db = h.db.lock_sync().unwrap();
        assert_eq!(
            db.get_review_rule(record.id).unwrap().unwrap().status,
            RuleStatus::Completed
        );
        let runs = db.get_runs_by_rule_id(record.id).unwrap();
        assert_eq!(runs.len(), 2);
        assert!(runs.iter().all(|r| r.status == RuleRunStatus::Completed));
        assert_eq!(runs[1].model.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_all_runs_failing_fails_the_rule() {
        let agent = ScriptedAgent::new(
            "fake",
            vec![
                Err(AgentError::non_retryable("bad 0")),
                Ok(AgentResult::text("   ")),
            ],
        );
        let h = Harness::new(vec![agent.clone()], 0);
        let review = h.create_review();
        let multi_rule = rule("security", "fake").with_multi_run(multi(2, &[]));

        let err = h
            .executor
            .execute_rule(&CancellationToken::new(), &multi_rule, &h.context(&review), None, 0)
            .await
            .unwrap_err();

        assert!(matches!(err, ReviewError::AllRunsFailed { total: 2, .. }));
        assert_eq!(agent.merge_calls(), 0);
    }
}

// =============================================================================
// Runner
// =============================================================================

mod runner {
    use super::*;

    fn request(h: &Harness, review: &reviewforge_common::Review, rules: Vec<RuleDefinition>) -> ReviewRunRequest {
        ReviewRunRequest {
            rules,
            context: h.context(review),
        }
    }

    #[tokio::test]
    async fn test_completed_rules_are_not_rerun_or_republished() {
        let agent = ScriptedAgent::new("fake", vec![]);
        let h = Harness::new(vec![agent.clone()], 0);
        let review = h.create_review();
        let req = request(&h, &review, vec![rule("style", "fake"), rule("bugs", "fake")]);
        let cancel = CancellationToken::new();

        h.runner
            .run_review_with_tracking(&cancel, &req, &review, "github")
            .await
            .unwrap();
        assert_eq!(agent.calls(), 2);
        assert_eq!(h.publisher.events().len(), 2);
        assert_eq!(h.review(review.id).status, ReviewStatus::Completed);

        h.runner
            .run_review_with_tracking(&cancel, &req, &review, "github")
            .await
            .unwrap();
        assert_eq!(agent.calls(), 2);
        assert_eq!(h.publisher.events().len(), 2);
        assert_eq!(h.review(review.id).status, ReviewStatus::Completed);

        let db = h.db.lock_sync().unwrap();
        let style = db.get_rule_by_review_and_rule_id(review.id, "style").unwrap().unwrap();
        assert_eq!(db.get_results_by_rule_id(style.id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_pending_rule_removed_from_rule_set_does_not_block_review() {
        let agent = ScriptedAgent::new("fake", vec![]);
        let h = Harness::new(vec![agent.clone()], 0);
        let review = h.create_review();
        h.db
            .lock_sync()
            .unwrap()
            .ensure_review_rule(review.id, "retired", 5)
            .unwrap();
        let req = request(&h, &review, vec![rule("style", "fake")]);

        h.runner
            .run_review_with_tracking(&CancellationToken::new(), &req, &review, "github")
            .await
            .unwrap();

        assert_eq!(agent.calls(), 1);
        assert_eq!(h.review(review.id).status, ReviewStatus::Completed);
        let db = h.db.lock_sync().unwrap();
        assert!(
            db.get_rule_by_review_and_rule_id(review.id, "retired")
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_failing_rule_does_not_stop_later_rules() {
        let agent = ScriptedAgent::new("fake", vec![Err(AgentError::non_retryable("no access"))]);
        let h = Harness::new(vec![agent.clone()], 0);
        let review = h.create_review();
        let req = request(&h, &review, vec![rule("style", "fake"), rule("bugs", "fake")]);

        let err = h
            .runner
            .run_review_with_tracking(&CancellationToken::new(), &req, &review, "github")
            .await
            .unwrap_err();

        assert!(matches!(err, ReviewError::RulesFailed { failed: 1, total: 2, .. }));
        assert_eq!(agent.calls(), 2);
        let stored = h.review(review.id);
        assert_eq!(stored.status, ReviewStatus::Failed);
        assert!(stored.error_message.unwrap().starts_with("style: "));
        let db = h.db.lock_sync().unwrap();
        let bugs = db.get_rule_by_review_and_rule_id(review.id, "bugs").unwrap().unwrap();
        assert_eq!(bugs.status, RuleStatus::Completed);
        // Only the successful rule publishes.
        drop(db);
        assert_eq!(h.publisher.events(), vec![(review.id, "bugs".to_string())]);
    }

    #[tokio::test]
    async fn test_status_update_twice_is_a_no_op() {
        let agent = ScriptedAgent::new("fake", vec![]);
        let h = Harness::new(vec![agent], 0);
        let review = h.create_review();
        let req = request(&h, &review, vec![rule("style", "fake")]);
        h.runner
            .run_review_with_tracking(&CancellationToken::new(), &req, &review, "github")
            .await
            .unwrap();
        let before = h.review(review.id);

        for _ in 0..2 {
            let status = h
                .runner
                .update_review_status_after_rule_execution(review.id)
                .await
                .unwrap();
            assert_eq!(status, ReviewStatus::Completed);
        }

        let after = h.review(review.id);
        assert_eq!(before.completed_at, after.completed_at);
        assert_eq!(before.duration_ms, after.duration_ms);
    }

    #[tokio::test]
    async fn test_resumed_multi_run_reuses_completed_slot() {
        let agent = ScriptedAgent::new("fake", vec![Ok(AgentResult::text("fresh run"))]);
        let h = Harness::new(vec![agent.clone()], 0);
        let review = h.create_review();
        let record = {
            let db = h.db.lock_sync().unwrap();
            db.mark_review_running(review.id).unwrap();
            let record = db.ensure_review_rule(review.id, "security", 0).unwrap();
            db.mark_rule_running(record.id, None).unwrap();
            let run = db.start_rule_run(record.id, 0, Some("a")).unwrap();
            db.finish_rule_run(run.id, RuleRunStatus::Completed, 10, 0, None, Some("stored run"))
                .unwrap();
            db.start_rule_run(record.id, 1, Some("b")).unwrap();
            record
        };
        let multi_rule = rule("security", "fake").with_multi_run(multi(2, &["a", "b"]));
        let req = request(&h, &review, vec![multi_rule]);

        h.runner
            .run_review_with_tracking(&CancellationToken::new(), &req, &review, "github")
            .await
            .unwrap();

        // One fresh slot plus the merge.
        assert_eq!(agent.calls(), 2);
        assert_eq!(agent.merge_calls(), 1);
        let db = h.db.lock_sync().unwrap();
        let runs = db.get_runs_by_rule_id(record.id).unwrap();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].output.as_deref(), Some("stored run"));
        assert_eq!(runs[1].output.as_deref(), Some("fresh run"));
    }
}

// =============================================================================
// Recovery
// =============================================================================

mod recovery {
    use super::*;

    #[tokio::test]
    async fn test_running_review_past_timeout_is_evicted() {
        let h = Harness::new(vec![], 0);
        let review = h.create_review();
        {
            let db = h.db.lock_sync().unwrap();
            db.mark_review_running(review.id).unwrap();
            db.set_review_started_at(review.id, Utc::now() - chrono::Duration::hours(25))
                .unwrap();
        }

        let report = h
            .recovery(RecoverySection {
                max_retry_count: 3,
                task_timeout_hours: 24,
            })
            .recover_to_queue()
            .await
            .unwrap();

        assert_eq!(report.evicted.len(), 1);
        assert!(!h.queue.has_task(review.id));
        let stored = h.review(review.id);
        assert_eq!(stored.status, ReviewStatus::Failed);
        assert!(stored.error_message.unwrap().contains("task timeout"));
    }

    #[tokio::test]
    async fn test_review_at_retry_ceiling_is_evicted() {
        let h = Harness::new(vec![], 0);
        let review = h.create_review();
        h.db.lock_sync()
            .unwrap()
            .set_review_retry_count(review.id, 3)
            .unwrap();

        h.recovery(RecoverySection::default())
            .recover_to_queue()
            .await
            .unwrap();

        assert!(!h.queue.has_task(review.id));
        let stored = h.review(review.id);
        assert_eq!(stored.status, ReviewStatus::Failed);
        assert!(stored
            .error_message
            .unwrap()
            .contains("max retry count exceeded"));
    }

    #[tokio::test]
    async fn test_running_review_claims_its_repository() {
        let h = Harness::new(vec![], 0);
        let running = h.create_review();
        let pending = h.create_review();
        h.db.lock_sync()
            .unwrap()
            .mark_review_running(running.id)
            .unwrap();

        let report = h
            .recovery(RecoverySection::default())
            .recover_to_queue()
            .await
            .unwrap();

        assert_eq!(report.enqueued_running, vec![running.id]);
        assert_eq!(report.enqueued_pending, vec![pending.id]);
        // The pending review waits behind the running one on the same repository.
        let first = h.queue.dequeue().unwrap();
        assert_eq!(first.review_id, running.id);
        assert!(first.rules.is_none());
        assert!(h.queue.dequeue().is_none());
        h.queue.complete(running.id);
        assert_eq!(h.queue.dequeue().unwrap().review_id, pending.id);
    }
}

// =============================================================================
// Retry
// =============================================================================

mod retry {
    use super::*;

    fn rules() -> RuleSet {
        RuleSet::new(vec![rule("a", "fake"), rule("b", "gate")])
    }

    #[tokio::test]
    async fn test_retry_of_completed_review_is_rejected_untouched() {
        let h = Harness::new(vec![], 0);
        let review = h.create_review();
        let before = h
            .db
            .lock_sync()
            .unwrap()
            .update_review_status(review.id, ReviewStatus::Completed, None, Some(10))
            .unwrap();

        let err = h.retry_handler(rules()).retry(review.id).await.unwrap_err();

        assert!(matches!(err, ReviewError::Validation(_)));
        let after = h.review(review.id);
        assert_eq!(after.status, ReviewStatus::Completed);
        assert_eq!(after.retry_count, before.retry_count);
        assert_eq!(after.completed_at, before.completed_at);
    }

    #[tokio::test]
    async fn test_retry_of_queued_review_is_rejected() {
        let h = Harness::new(vec![], 0);
        let review = h.create_review();
        let task = build_recovery_task(&review, &ProviderRegistry::with_defaults()).unwrap();
        assert!(h.queue.enqueue(task));
        h.db.lock_sync()
            .unwrap()
            .update_review_status(review.id, ReviewStatus::Failed, Some("boom"), None)
            .unwrap();

        let err = h.retry_handler(rules()).retry(review.id).await.unwrap_err();

        assert!(err.to_string().contains("already in the queue"));
        let stored = h.review(review.id);
        assert_eq!(stored.status, ReviewStatus::Failed);
        assert_eq!(stored.retry_count, 0);
    }

    #[tokio::test]
    async fn test_rule_retry_runs_detached_and_leaves_siblings_alone() {
        let fake = ScriptedAgent::new("fake", vec![]);
        let gate = GatedAgent::new("gate");
        let h = Harness::new(vec![fake.clone(), gate.clone()], 0);
        let review = h.create_review();
        let (rule_a, rule_b) = {
            let db = h.db.lock_sync().unwrap();
            db.mark_review_running(review.id).unwrap();
            let a = db.ensure_review_rule(review.id, "a", 0).unwrap();
            let b = db.ensure_review_rule(review.id, "b", 1).unwrap();
            db.mark_rule_running(a.id, None).unwrap();
            db.finish_rule(b.id, RuleStatus::Failed, 0, Some("flaky"), 5)
                .unwrap();
            (a, b)
        };

        let handle = h
            .retry_handler(rules())
            .retry_rule(review.id, "b")
            .await
            .unwrap();

        tokio::time::timeout(Duration::from_secs(5), gate.wait_started())
            .await
            .expect("retry never reached the agent");
        assert!(!handle.is_finished());
        {
            let db = h.db.lock_sync().unwrap();
            let a = db.get_review_rule(rule_a.id).unwrap().unwrap();
            assert_eq!(a.status, RuleStatus::Running);
            let b = db.get_review_rule(rule_b.id).unwrap().unwrap();
            assert_eq!(b.status, RuleStatus::Running);
            assert_eq!(b.retry_count, 1);
        }

        gate.open();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("retry did not finish")
            .unwrap();

        let db = h.db.lock_sync().unwrap();
        let a = db.get_review_rule(rule_a.id).unwrap().unwrap();
        assert_eq!(a.status, RuleStatus::Running);
        let b = db.get_review_rule(rule_b.id).unwrap().unwrap();
        assert_eq!(b.status, RuleStatus::Completed);
        assert_eq!(b.findings_count, 1);
        assert_eq!(db.get_results_by_rule_id(rule_b.id).unwrap().len(), 1);
        // Rule a is still running, so the review stays running.
        let stored = db.get_review(review.id).unwrap().unwrap();
        assert_eq!(stored.status, ReviewStatus::Running);
        assert_eq!(stored.retry_count, 1);
        assert_eq!(fake.calls(), 0);
        assert_eq!(gate.calls(), 1);
    }

    #[tokio::test]
    async fn test_rule_retry_for_rule_missing_from_rule_set_fails_it_again() {
        let h = Harness::new(vec![ScriptedAgent::new("fake", vec![])], 0);
        let review = h.create_review();
        let record = {
            let db = h.db.lock_sync().unwrap();
            db.mark_review_running(review.id).unwrap();
            let r = db.ensure_review_rule(review.id, "retired", 0).unwrap();
            db.finish_rule(r.id, RuleStatus::Failed, 0, Some("old"), 5)
                .unwrap();
            r
        };

        h.retry_handler(rules())
            .retry_rule(review.id, "retired")
            .await
            .unwrap()
            .await
            .unwrap();

        let stored = h
            .db
            .lock_sync()
            .unwrap()
            .get_review_rule(record.id)
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, RuleStatus::Failed);
        assert!(stored
            .error_message
            .unwrap()
            .contains("not defined in the current rule set"));
        assert_eq!(h.review(review.id).status, ReviewStatus::Failed);
    }

    #[test]
    fn test_payload_fixture_counts_one_finding() {
        let value: serde_json::Value = serde_json::from_str(FINDINGS_JSON).unwrap();
        assert_eq!(reviewforge_common::findings_count(Some(&value)), 1);
    }
}
