//! `reviewforge worker`: recover, then drain the queue.

use anyhow::Result;

use super::{Services, interrupt_token};

pub async fn cmd_worker(services: &Services, concurrency: usize) -> Result<()> {
    let cancel = interrupt_token();

    let recovery = services.recovery().recover_to_queue().await?;
    tracing::info!(
        scanned = recovery.scanned,
        evicted = recovery.evicted.len(),
        queued = services.queue.pending_len(),
        "Recovery pass complete"
    );

    let report = services.worker_pool(concurrency).run(cancel).await;
    println!(
        "Processed {} review(s): {} completed, {} failed",
        report.processed, report.completed, report.failed
    );
    Ok(())
}
