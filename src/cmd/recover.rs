//! `reviewforge recover`: one recovery pass, then print the queue.

use anyhow::Result;

use super::Services;

pub async fn cmd_recover(services: &Services) -> Result<()> {
    let report = services.recovery().recover_to_queue().await?;

    println!("Scanned {} in-flight review(s)", report.scanned);
    for (id, reason) in &report.evicted {
        println!("  evicted  #{}: {}", id, reason);
    }
    for (id, reason) in &report.failed {
        println!("  failed   #{}: {}", id, reason);
    }
    for id in &report.already_queued {
        println!("  skipped  #{}: already queued", id);
    }

    let entries = services.queue.entries();
    if entries.is_empty() {
        println!("Queue is empty");
    } else {
        println!("Queue:");
        for entry in entries {
            let state = if entry.running { "running" } else { "pending" };
            println!("  #{:<6} {:<8} {}", entry.review_id, state, entry.repo_url);
        }
    }
    Ok(())
}
