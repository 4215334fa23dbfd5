//! `reviewforge status`: print a review, its rules and their runs.

use anyhow::{Context, Result};
use reviewforge_common::{Review, ReviewRule, ReviewRuleRun};
use serde::Serialize;

use super::Services;

#[derive(Serialize)]
struct RuleView {
    #[serde(flatten)]
    rule: ReviewRule,
    runs: Vec<ReviewRuleRun>,
}

#[derive(Serialize)]
struct ReviewView {
    #[serde(flatten)]
    review: Review,
    rules: Vec<RuleView>,
}

pub async fn cmd_status(services: &Services, review_id: i64, json: bool) -> Result<()> {
    let view = services
        .db
        .call(move |db| {
            let Some(review) = db.get_review(review_id)? else {
                return Ok(None);
            };
            let mut rules = Vec::new();
            for rule in db.get_rules_by_review_id(review_id)? {
                let runs = db.get_runs_by_rule_id(rule.id)?;
                rules.push(RuleView { rule, runs });
            }
            Ok(Some(ReviewView { review, rules }))
        })
        .await?
        .with_context(|| format!("Review {} not found", review_id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    let review = &view.review;
    println!("Review #{} {} @ {}", review.id, review.repo_url, review.ref_name);
    println!("  status:  {}", review.status);
    println!("  retries: {}", review.retry_count);
    if let Some(ms) = review.duration_ms {
        println!("  took:    {}ms", ms);
    }
    if let Some(err) = &review.error_message {
        println!("  error:   {}", err);
    }

    if view.rules.is_empty() {
        println!("  (no rules recorded)");
    }
    for RuleView { rule, runs } in &view.rules {
        println!(
            "  [{}] {:<24} {:<9} findings={} retries={}",
            rule.rule_index, rule.rule_id, rule.status, rule.findings_count, rule.retry_count
        );
        if let Some(err) = &rule.error_message {
            println!("        error: {}", err);
        }
        for run in runs {
            println!(
                "        run {} {:<9} model={}",
                run.run_index,
                run.status,
                run.model.as_deref().unwrap_or("default")
            );
        }
    }
    Ok(())
}
