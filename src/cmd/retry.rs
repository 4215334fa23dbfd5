//! `reviewforge retry` and `reviewforge retry-rule`.

use anyhow::Result;

use super::{Services, interrupt_token};

pub async fn cmd_retry(services: &Services, review_id: i64, run: bool) -> Result<()> {
    let cancel = interrupt_token();
    let task = services.retry_handler(cancel.clone()).retry(review_id).await?;
    println!(
        "Review {} requeued ({}/{})",
        task.review_id, task.owner, task.repo
    );

    if run {
        let report = services.worker_pool(1).run(cancel).await;
        println!(
            "Processed {} review(s): {} completed, {} failed",
            report.processed, report.completed, report.failed
        );
    } else {
        println!("Run `reviewforge worker` to process it.");
    }
    Ok(())
}

pub async fn cmd_retry_rule(services: &Services, review_id: i64, rule_id: &str) -> Result<()> {
    let handler = services.retry_handler(interrupt_token());
    let handle = handler.retry_rule(review_id, rule_id).await?;
    println!("Rule '{}' of review {} reset, re-running...", rule_id, review_id);
    handle.await?;

    let rule_key = rule_id.to_string();
    let (review, rule) = services
        .db
        .call(move |db| {
            let review = db.get_review(review_id)?;
            let rule = db.get_rule_by_review_and_rule_id(review_id, &rule_key)?;
            Ok((review, rule))
        })
        .await?;
    if let Some(rule) = rule {
        match &rule.error_message {
            Some(err) => println!("Rule '{}': {} ({})", rule.rule_id, rule.status, err),
            None => println!("Rule '{}': {}", rule.rule_id, rule.status),
        }
    }
    if let Some(review) = review {
        println!("Review {}: {}", review.id, review.status);
    }
    Ok(())
}
