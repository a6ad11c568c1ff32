//! Background chunk driver
//!
//! A single loop ticks every `TICK_INTERVAL` and advances every
//! iniciado/processando job by one chunk, reading the job rows fresh each
//! tick. Because the persisted cursor is the source of truth and replayed
//! chunks resolve from the cache, a tick that races a pause/cancel or a
//! process restart never corrupts a job.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::db;
use crate::jobs::JobOrchestrator;

/// Pause between chunk-advance sweeps
pub const TICK_INTERVAL: Duration = Duration::from_secs(2);

/// Run the chunk driver until the token is cancelled
pub async fn run(orchestrator: JobOrchestrator, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    tracing::info!("Chunk driver started");

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!("Chunk driver shutting down");
                return;
            }
            _ = interval.tick() => {
                tick(&orchestrator).await;
            }
        }
    }
}

/// One sweep: advance every advanceable job by one chunk
async fn tick(orchestrator: &JobOrchestrator) {
    let jobs = match db::jobs::jobs_to_advance(orchestrator.pool()).await {
        Ok(jobs) => jobs,
        Err(e) => {
            tracing::error!(error = %e, "Failed to list advanceable jobs");
            return;
        }
    };

    for job in jobs {
        let job_id = job.id;
        if let Err(e) = orchestrator.advance_chunk(job).await {
            tracing::error!(job_id = %job_id, error = %e, "Chunk advance failed");
            // Re-read the row: the failed advance may not have persisted
            match db::jobs::load_job(orchestrator.pool(), job_id).await {
                Ok(Some(current)) if !current.is_terminal() => {
                    if let Err(e2) = orchestrator.fail_job(current, e.to_string()).await {
                        tracing::error!(job_id = %job_id, error = %e2, "Failed to mark job erro");
                    }
                }
                Ok(_) => {}
                Err(e2) => {
                    tracing::error!(job_id = %job_id, error = %e2, "Failed to reload job after error");
                }
            }
        }
    }
}

/// Spawn the driver as a background task
pub fn spawn(orchestrator: JobOrchestrator, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(orchestrator, shutdown))
}
