use std::sync::Arc;

use reviewforge_common::{Agent, AgentResult};
use tokio_util::sync::CancellationToken;

use super::executor::{BuildContext, RuleExecutor};
use crate::errors::ReviewError;
use crate::prompt::{MergeInput, build_merge_prompt};
use crate::rules::RuleDefinition;

impl RuleExecutor {
    /// Merge several successful run outputs with one more call to the same
    /// agent, using the merge model when one is configured.
    pub(super) async fn merge_runs(
        &self,
        cancel: &CancellationToken,
        agent: &Arc<dyn Agent>,
        ctx: &BuildContext,
        rule: &RuleDefinition,
        merge_model: Option<String>,
        inputs: &[MergeInput],
    ) -> Result<AgentResult, ReviewError> {
        tracing::info!(
            review_id = ctx.request.review_id,
            rule_id = %rule.id,
            inputs = inputs.len(),
            model = ?merge_model,
            "Merging run outputs"
        );
        let prompt = build_merge_prompt(inputs);
        let request = Self::request_for(ctx, rule, merge_model);
        let label = format!("{}#merge", rule.id);
        let merged = self
            .call_agent(cancel, agent, &request, &prompt, &label)
            .await?;
        if merged.is_empty() {
            return Err(ReviewError::internal("merge returned empty output"));
        }
        Ok(merged)
    }
}
