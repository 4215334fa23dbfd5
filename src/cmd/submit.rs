//! `reviewforge submit`: record a pending review for the next worker.

use anyhow::{Context, Result};
use reviewforge::provider::ProviderResolver;

use super::Services;

pub async fn cmd_submit(
    services: &Services,
    repo_url: &str,
    ref_name: &str,
    commit: Option<&str>,
    pr: Option<i64>,
) -> Result<()> {
    if services.providers.detect_from_url(repo_url).is_none() {
        anyhow::bail!("No provider recognises {}", repo_url);
    }

    let url = repo_url.to_string();
    let ref_name = ref_name.to_string();
    let commit = commit.map(str::to_string);
    let review = services
        .db
        .call(move |db| db.create_review(&url, &ref_name, commit.as_deref(), pr))
        .await
        .context("Failed to create review")?;

    tracing::info!(review_id = review.id, repo_url = %review.repo_url, "Review submitted");
    println!("Submitted review {} for {} @ {}", review.id, review.repo_url, review.ref_name);
    Ok(())
}
