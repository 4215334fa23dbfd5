use chrono::{DateTime, Utc};
use reviewforge_common::{AgentRequest, Review};
use uuid::Uuid;

use crate::errors::ReviewError;
use crate::provider::ProviderResolver;
use crate::rules::RuleSet;

/// A unit of work for the queue: one review to (re)run.
#[derive(Debug, Clone)]
pub struct ReviewTask {
    pub id: String,
    pub review_id: i64,
    pub provider: String,
    pub owner: String,
    pub repo: String,
    pub request: AgentRequest,
    /// Rules to run. `None` means "load them after checkout".
    pub rules: Option<RuleSet>,
    pub created_at: DateTime<Utc>,
}

impl ReviewTask {
    pub fn repo_url(&self) -> &str {
        &self.request.repo_url
    }
}

/// Rebuild a task for a persisted review.
///
/// The rule set is left unresolved on purpose: it is reloaded from the
/// checkout, the repository setting or the default file once the worker
/// has the repository in hand.
pub fn build_recovery_task(
    review: &Review,
    providers: &dyn ProviderResolver,
) -> Result<ReviewTask, ReviewError> {
    let provider_name = providers.detect_from_url(&review.repo_url).ok_or_else(|| {
        ReviewError::internal(format!("no provider recognises {}", review.repo_url))
    })?;
    let provider = providers.get(&provider_name).ok_or_else(|| {
        ReviewError::internal(format!("provider '{}' is not registered", provider_name))
    })?;
    let (owner, repo) = provider
        .parse_repo_path(&review.repo_url)
        .map_err(|e| ReviewError::internal(format!("{:#}", e)))?;

    let request = AgentRequest {
        review_id: review.id,
        repo_url: review.repo_url.clone(),
        ref_name: review.ref_name.clone(),
        commit_sha: review.commit_sha.clone(),
        pr_number: review.pr_number,
        ..Default::default()
    };

    Ok(ReviewTask {
        id: Uuid::new_v4().to_string(),
        review_id: review.id,
        provider: provider_name,
        owner,
        repo,
        request,
        rules: None,
        created_at: Utc::now(),
    })
}
