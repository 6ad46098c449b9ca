//! Periodic queue worker.
//!
//! Runs one scheduling cycle per tick until shutdown. Several workers (in
//! this process or others) may poll the same database; the store's atomic
//! claim keeps them from stepping on each other.

use crate::index_queue::{IndexQueue, RunLimit};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub struct QueueWorker {
    queue: Arc<IndexQueue>,
    jobs_per_cycle: usize,
    interval: Duration,
}

impl QueueWorker {
    pub fn new(queue: Arc<IndexQueue>, jobs_per_cycle: usize, interval_secs: u64) -> Self {
        Self {
            queue,
            jobs_per_cycle,
            interval: Duration::from_secs(interval_secs),
        }
    }

    /// Main processing loop - call from a spawned task.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            "Queue worker starting (interval={}s, jobs_per_cycle={})",
            self.interval.as_secs(),
            self.jobs_per_cycle
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {
                    match self.queue.run(RunLimit::Jobs(self.jobs_per_cycle), false) {
                        Ok(Some(summary)) => {
                            debug!(
                                "Cycle done: {} jobs, {}s",
                                summary.processed_count, summary.duration_seconds
                            );
                        }
                        Ok(None) => {
                            debug!("Queue disabled, cycle skipped");
                        }
                        Err(e) => {
                            // Cycle-level fault: surface it and keep polling,
                            // the reaper recovers anything left locked
                            error!("Queue cycle failed: {:#}", e);
                        }
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Queue worker shutting down");
                    break;
                }
            }
        }

        info!("Queue worker stopped");
    }
}
