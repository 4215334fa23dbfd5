//! Executes one rule to completion.
//!
//! A rule runs either once, or `N >= 2` times in sequence (cycling through
//! the configured models) with the successful outputs merged by a final
//! call to the same agent. Every agent call goes through [`with_backoff`].
//! When a tracking record is supplied, the outcome is written back to it
//! whatever happens, except on cancellation: a cancelled rule stays
//! `running` so the next recovery pass resumes it.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reviewforge_common::{
    Agent, AgentRequest, AgentResult, Review, ReviewRule, RuleRunStatus, RuleStatus,
    findings_count,
};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::retry::{RetryPolicy, with_backoff};
use crate::agent::AgentRegistry;
use crate::errors::{ReviewError, db_err};
use crate::prompt::{MergeInput, PromptBuilder, PromptContext};
use crate::rules::RuleDefinition;
use crate::store::DbHandle;
use crate::util::{parse_json_payload, truncate_chars};

/// Inputs shared by every rule of one review.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    pub prompt: PromptContext,
    /// Template request; rule id, model and run index are filled per call.
    pub request: AgentRequest,
}

impl BuildContext {
    pub fn for_review(review: &Review, owner: &str, repo: &str, checkout_dir: Option<PathBuf>) -> Self {
        let prompt = PromptContext {
            repo_url: review.repo_url.clone(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            ref_name: review.ref_name.clone(),
            commit_sha: review.commit_sha.clone(),
            pr_number: review.pr_number,
            checkout_dir: checkout_dir.clone(),
            ..Default::default()
        };
        let request = AgentRequest {
            review_id: review.id,
            repo_url: review.repo_url.clone(),
            ref_name: review.ref_name.clone(),
            commit_sha: review.commit_sha.clone(),
            pr_number: review.pr_number,
            working_dir: checkout_dir,
            ..Default::default()
        };
        Self { prompt, request }
    }
}

/// What a rule produced.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub rule_id: String,
    pub text: String,
    pub data: Option<Value>,
    pub model: Option<String>,
    /// Run slots requested (1 for single-run rules).
    pub runs: u32,
    pub merged: bool,
    pub duration: Duration,
}

impl ExecutionOutcome {
    fn from_text(rule: &RuleDefinition, text: String, model: Option<String>, runs: u32) -> Self {
        let data = parse_json_payload(&text);
        Self {
            rule_id: rule.id.clone(),
            text,
            data,
            model,
            runs,
            merged: false,
            duration: Duration::ZERO,
        }
    }

    pub fn findings_count(&self) -> i32 {
        findings_count(self.data.as_ref())
    }

    /// Structured payload worth persisting, if any.
    pub fn payload(&self) -> Option<&Value> {
        self.data
            .as_ref()
            .filter(|d| !d.is_null() && d.as_object().is_none_or(|o| !o.is_empty()))
    }
}

pub(crate) fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

/// Text kept for a run: the agent's text, or its payload when the text is blank.
fn raw_output(result: &AgentResult) -> String {
    if !result.text.trim().is_empty() {
        return result.text.clone();
    }
    result
        .data
        .as_ref()
        .map(|d| d.to_string())
        .unwrap_or_default()
}

pub struct RuleExecutor {
    db: DbHandle,
    agents: Arc<AgentRegistry>,
    prompts: PromptBuilder,
    policy: RetryPolicy,
    default_runs: u32,
}

impl RuleExecutor {
    pub fn new(db: DbHandle, agents: Arc<AgentRegistry>, policy: RetryPolicy, default_runs: u32) -> Self {
        Self {
            db,
            agents,
            prompts: PromptBuilder::new(),
            policy,
            default_runs,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `rule` and, when `review_rule` is given, record the outcome on it.
    pub async fn execute_rule(
        &self,
        cancel: &CancellationToken,
        rule: &RuleDefinition,
        ctx: &BuildContext,
        review_rule: Option<&ReviewRule>,
        rule_index: usize,
    ) -> Result<ExecutionOutcome, ReviewError> {
        let started = Instant::now();
        let review_id = ctx.request.review_id;
        let rule_row = review_rule.map(|r| r.id);
        tracing::info!(review_id, rule_id = %rule.id, rule_index, "Executing rule");

        if let Some(id) = rule_row {
            let snapshot = rule.snapshot().ok();
            self.db
                .call(move |db| db.mark_rule_running(id, snapshot.as_deref()))
                .await
                .map_err(db_err)?;
        }

        let result = self.run(cancel, rule, ctx, rule_row).await;
        let elapsed = started.elapsed();

        let Some(id) = rule_row else {
            return result.map(|mut outcome| {
                outcome.duration = elapsed;
                outcome
            });
        };

        match result {
            Ok(mut outcome) => {
                outcome.duration = elapsed;
                let findings = outcome.findings_count();
                let ms = duration_ms(elapsed);
                self.db
                    .call(move |db| db.finish_rule(id, RuleStatus::Completed, findings, None, ms))
                    .await
                    .map_err(db_err)?;
                tracing::info!(
                    review_id,
                    rule_id = %rule.id,
                    findings,
                    merged = outcome.merged,
                    duration_ms = ms,
                    "Rule completed"
                );
                Ok(outcome)
            }
            Err(ReviewError::Cancelled) => {
                tracing::warn!(review_id, rule_id = %rule.id, "Rule cancelled, left running");
                Err(ReviewError::Cancelled)
            }
            Err(e) => {
                let message = e.to_string();
                let ms = duration_ms(elapsed);
                if let Err(write_err) = self
                    .db
                    .call(move |db| db.finish_rule(id, RuleStatus::Failed, 0, Some(&message), ms))
                    .await
                {
                    tracing::error!(
                        review_id,
                        rule_id = %rule.id,
                        "Failed to record rule failure: {:#}",
                        write_err
                    );
                }
                tracing::warn!(review_id, rule_id = %rule.id, "Rule failed: {}", e);
                Err(e)
            }
        }
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        rule: &RuleDefinition,
        ctx: &BuildContext,
        rule_row: Option<i64>,
    ) -> Result<ExecutionOutcome, ReviewError> {
        let prompt = self.prompts.render(rule, &ctx.prompt)?;
        if let Some(id) = rule_row {
            let stored = prompt.clone();
            self.db
                .call(move |db| db.update_rule_prompt(id, &stored))
                .await
                .map_err(db_err)?;
        }

        let agent = self.resolve_agent(rule)?;

        match rule.requested_runs(self.default_runs) {
            Some(runs) if runs >= 2 => {
                self.run_multi(cancel, rule, ctx, rule_row, &agent, &prompt, runs)
                    .await
            }
            Some(_) => {
                // A single requested run never merges.
                let model = rule
                    .multi_run
                    .as_ref()
                    .and_then(|m| m.model_for_run(0))
                    .or_else(|| rule.model.clone());
                self.run_single(cancel, rule, ctx, &agent, &prompt, model).await
            }
            None => {
                self.run_single(cancel, rule, ctx, &agent, &prompt, rule.model.clone())
                    .await
            }
        }
    }

    fn resolve_agent(&self, rule: &RuleDefinition) -> Result<Arc<dyn Agent>, ReviewError> {
        let name = rule
            .agent
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                ReviewError::AgentNotFound(format!("rule '{}' specifies no agent", rule.id))
            })?;
        let agent = self
            .agents
            .resolve(name)
            .ok_or_else(|| ReviewError::AgentNotFound(name.to_string()))?;
        if !agent.available() {
            return Err(ReviewError::NonRetryableExecution(format!(
                "agent '{}' is not available",
                name
            )));
        }
        Ok(agent)
    }

    pub(super) fn request_for(
        ctx: &BuildContext,
        rule: &RuleDefinition,
        model: Option<String>,
    ) -> AgentRequest {
        let mut request = ctx.request.clone();
        request.rule_id = rule.id.clone();
        request.model = model;
        request
    }

    /// One agent call under the retry policy. A result flagged unsuccessful
    /// counts as a retryable failure.
    pub(super) async fn call_agent(
        &self,
        cancel: &CancellationToken,
        agent: &Arc<dyn Agent>,
        request: &AgentRequest,
        prompt: &str,
        label: &str,
    ) -> Result<AgentResult, ReviewError> {
        with_backoff(
            &self.policy,
            cancel,
            label,
            move |attempt| async move {
                tracing::debug!(
                    review_id = request.review_id,
                    rule_id = %request.rule_id,
                    run_index = ?request.run_index,
                    attempt,
                    agent = agent.name(),
                    "Calling agent"
                );
                let result = agent.execute_with_prompt(cancel, request, prompt).await;
                if cancel.is_cancelled() {
                    return Err(ReviewError::Cancelled);
                }
                let result = result?;
                if !result.success {
                    return Err(ReviewError::RetryableExecution(format!(
                        "agent '{}' reported failure: {}",
                        agent.name(),
                        truncate_chars(result.text.trim(), 500)
                    )));
                }
                Ok(result)
            },
            ReviewError::is_retryable,
        )
        .await
    }

    async fn run_single(
        &self,
        cancel: &CancellationToken,
        rule: &RuleDefinition,
        ctx: &BuildContext,
        agent: &Arc<dyn Agent>,
        prompt: &str,
        model: Option<String>,
    ) -> Result<ExecutionOutcome, ReviewError> {
        let request = Self::request_for(ctx, rule, model);
        let result = self
            .call_agent(cancel, agent, &request, prompt, &rule.id)
            .await?;
        let data = result
            .data
            .clone()
            .filter(|d| !d.is_null())
            .or_else(|| parse_json_payload(&result.text));
        Ok(ExecutionOutcome {
            rule_id: rule.id.clone(),
            text: result.text,
            data,
            model: result.model.or(request.model),
            runs: 1,
            merged: false,
            duration: Duration::ZERO,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_multi(
        &self,
        cancel: &CancellationToken,
        rule: &RuleDefinition,
        ctx: &BuildContext,
        rule_row: Option<i64>,
        agent: &Arc<dyn Agent>,
        prompt: &str,
        runs: u32,
    ) -> Result<ExecutionOutcome, ReviewError> {
        let multi = rule.multi_run.clone().unwrap_or_default();
        let review_id = ctx.request.review_id;

        // Slots finished before a restart keep their stored output.
        let completed: HashMap<i32, (Option<String>, String)> = match rule_row {
            Some(id) => self
                .db
                .call(move |db| db.get_runs_by_rule_id(id))
                .await
                .map_err(db_err)?
                .into_iter()
                .filter(|r| r.status == RuleRunStatus::Completed)
                .filter_map(|r| r.output.map(|out| (r.run_index, (r.model, out))))
                .collect(),
            None => HashMap::new(),
        };

        let mut successes: Vec<MergeInput> = Vec::new();
        let mut errors: Vec<String> = Vec::new();

        for index in 0..runs {
            if cancel.is_cancelled() {
                return Err(ReviewError::Cancelled);
            }
            let slot = index as i32;

            if let Some((model, output)) = completed.get(&slot) {
                tracing::info!(review_id, rule_id = %rule.id, run_index = index, "Reusing completed run");
                successes.push(MergeInput {
                    run_index: index,
                    model: model.clone(),
                    text: output.clone(),
                });
                continue;
            }

            let model = multi
                .model_for_run(index as usize)
                .or_else(|| rule.model.clone());
            let run_row = match rule_row {
                Some(id) => {
                    let m = model.clone();
                    let run = self
                        .db
                        .call(move |db| {
                            db.update_rule_run_index(id, slot)?;
                            db.start_rule_run(id, slot, m.as_deref())
                        })
                        .await
                        .map_err(db_err)?;
                    Some(run.id)
                }
                None => None,
            };

            let request = Self::request_for(ctx, rule, model.clone()).with_run_index(index);
            let label = format!("{}#{}", rule.id, index);
            let started = Instant::now();
            let attempt = self.call_agent(cancel, agent, &request, prompt, &label).await;
            let ms = duration_ms(started.elapsed());

            let (status, findings, error, output) = match attempt {
                Err(ReviewError::Cancelled) => return Err(ReviewError::Cancelled),
                Err(e) => (RuleRunStatus::Failed, 0, Some(e.to_string()), None),
                Ok(result) if result.is_empty() => (
                    RuleRunStatus::Failed,
                    0,
                    Some("agent returned empty output".to_string()),
                    None,
                ),
                Ok(result) => {
                    let raw = raw_output(&result);
                    let data = result.data.clone().or_else(|| parse_json_payload(&raw));
                    (RuleRunStatus::Completed, findings_count(data.as_ref()), None, Some(raw))
                }
            };

            match (&output, &error) {
                (Some(text), _) => {
                    tracing::info!(review_id, rule_id = %rule.id, run_index = index, "Run completed");
                    successes.push(MergeInput {
                        run_index: index,
                        model: model.clone(),
                        text: text.clone(),
                    });
                }
                (None, err) => {
                    let err = err.clone().unwrap_or_default();
                    tracing::warn!(review_id, rule_id = %rule.id, run_index = index, "Run failed: {}", err);
                    errors.push(format!("run {}: {}", index, err));
                }
            }

            if let Some(run_id) = run_row {
                self.db
                    .call(move |db| {
                        db.finish_rule_run(
                            run_id,
                            status,
                            ms,
                            findings,
                            error.as_deref(),
                            output.as_deref(),
                        )
                    })
                    .await
                    .map_err(db_err)?;
            }
        }

        if successes.is_empty() {
            return Err(ReviewError::AllRunsFailed {
                total: runs as usize,
                errors: errors.join("; "),
            });
        }
        if successes.len() == 1 {
            let only = successes.remove(0);
            return Ok(ExecutionOutcome::from_text(rule, only.text, only.model, runs));
        }

        match self
            .merge_runs(cancel, agent, ctx, rule, multi.merge_model.clone(), &successes)
            .await
        {
            Ok(merged) => {
                let text = raw_output(&merged);
                let data = merged
                    .data
                    .clone()
                    .filter(|d| !d.is_null())
                    .or_else(|| parse_json_payload(&text));
                Ok(ExecutionOutcome {
                    rule_id: rule.id.clone(),
                    text,
                    data,
                    model: merged.model.or(multi.merge_model),
                    runs,
                    merged: true,
                    duration: Duration::ZERO,
                })
            }
            Err(ReviewError::Cancelled) => Err(ReviewError::Cancelled),
            Err(e) => {
                tracing::warn!(
                    review_id,
                    rule_id = %rule.id,
                    "Merge failed, falling back to first successful run: {}",
                    e
                );
                let first = successes.remove(0);
                Ok(ExecutionOutcome::from_text(rule, first.text, first.model, runs))
            }
        }
    }
}
