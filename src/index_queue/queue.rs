//! Scheduling cycle orchestration.
//!
//! One `IndexQueue` instance per worker process. Each cycle runs
//! Cleaning -> Claiming -> Executing -> Reporting against the shared store;
//! several workers may cycle concurrently, coordinated only through the
//! store's atomic claim.

use super::dispatcher::Dispatcher;
use super::job::Job;
use super::merger::{self, METHOD_MOVE_INDEX};
use super::models::{
    ArchiveOutcome, ArchivedJob, ClaimLane, JobPayload, JobRecord, NewJob, QueueStats, RunSummary,
};
use super::store::QueueStore;
use crate::config::{QueueSettings, FULL_REINDEX_SHARE};
use anyhow::Result;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

/// How many jobs a run may take on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunLimit {
    /// Claim up to this many jobs in a single cycle.
    Jobs(usize),
    /// Ignore the lane ratio and repeat cycles until the queue is empty.
    Drain,
}

/// What happened to an enqueue call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// A row was inserted with this id.
    Queued(i64),
    /// The queue is disabled; the handler ran synchronously instead.
    ExecutedInline,
}

/// A deferred operation to be queued (or run inline when the queue is
/// disabled).
#[derive(Debug, Clone)]
pub struct EnqueueRequest {
    pub handler: String,
    pub method: String,
    pub payload: JobPayload,
    /// Batch-accounting unit count; defaults to the entity count.
    pub size: Option<i64>,
    pub is_full_reindex: bool,
}

impl EnqueueRequest {
    pub fn new(handler: &str, method: &str, payload: JobPayload) -> Self {
        Self {
            handler: handler.to_string(),
            method: method.to_string(),
            payload,
            size: None,
            is_full_reindex: false,
        }
    }

    pub fn with_size(mut self, size: i64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn full_reindex(mut self) -> Self {
        self.is_full_reindex = true;
        self
    }
}

struct LaneClaim {
    jobs: Vec<Job>,
    last_id: i64,
}

struct CycleOutcome {
    summary: RunSummary,
    claimed: usize,
}

/// The persistent job queue scheduler.
pub struct IndexQueue {
    store: Arc<dyn QueueStore>,
    dispatcher: Arc<dyn Dispatcher>,
    settings: QueueSettings,
    /// Lock-owner token: process id plus a random component, so two workers
    /// on one host never collide.
    owner: String,
}

impl IndexQueue {
    pub fn new(
        store: Arc<dyn QueueStore>,
        dispatcher: Arc<dyn Dispatcher>,
        settings: QueueSettings,
    ) -> Self {
        let owner = format!("{}-{}", std::process::id(), uuid::Uuid::new_v4());
        Self {
            store,
            dispatcher,
            settings,
            owner,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    // =========================================================================
    // Enqueue API
    // =========================================================================

    /// Queue a deferred operation.
    ///
    /// When the queue is administratively disabled the handler is invoked
    /// synchronously instead: no durability, but indexing still happens.
    pub fn enqueue(&self, request: EnqueueRequest) -> Result<EnqueueOutcome> {
        if !self.settings.enabled {
            self.dispatcher
                .invoke(&request.handler, &request.method, &request.payload)?;
            return Ok(EnqueueOutcome::ExecutedInline);
        }

        let payload_size = request
            .size
            .unwrap_or_else(|| request.payload.entity_ids.len().max(1) as i64);
        let debug_trace = if self.settings.capture_debug_traces {
            Some(std::backtrace::Backtrace::force_capture().to_string())
        } else {
            None
        };

        let id = self.store.insert(NewJob {
            handler: request.handler,
            method: request.method,
            payload: request.payload.to_raw()?,
            payload_size,
            max_retries: self.settings.max_retries as i32,
            is_full_reindex: request.is_full_reindex,
            debug_trace,
        })?;
        Ok(EnqueueOutcome::Queued(id))
    }

    // =========================================================================
    // Run API
    // =========================================================================

    /// Run one scheduling cycle (or a full drain).
    ///
    /// Returns `None` when the queue is disabled and `force` is not set.
    /// Per-job failures are isolated and recorded; only cycle-level faults
    /// (store errors, invalid settings) surface as `Err`.
    pub fn run(&self, limit: RunLimit, force: bool) -> Result<Option<RunSummary>> {
        if !self.settings.enabled && !force {
            info!("Indexing queue is disabled, skipping cycle");
            return Ok(None);
        }
        self.settings.validate()?;

        self.clean()?;

        let summary = match limit {
            RunLimit::Jobs(max_jobs) => self.run_cycle(max_jobs, true)?.summary,
            RunLimit::Drain => {
                let mut total = RunSummary {
                    started_at: chrono::Utc::now().timestamp(),
                    processed_count: 0,
                    duration_seconds: 0,
                    ran_against_empty_queue: false,
                };
                loop {
                    let outcome = self.run_cycle(self.settings.jobs_per_cycle, false)?;
                    total.processed_count += outcome.summary.processed_count;
                    total.duration_seconds += outcome.summary.duration_seconds;
                    if outcome.claimed == 0 {
                        total.ran_against_empty_queue = true;
                        break;
                    }
                }
                total
            }
        };
        Ok(Some(summary))
    }

    // =========================================================================
    // Operator surface
    // =========================================================================

    pub fn status(&self) -> Result<QueueStats> {
        self.store.stats()
    }

    /// Jobs whose retry budget is spent but which have not been swept to the
    /// archive yet.
    pub fn failed_jobs(&self) -> Result<Vec<JobRecord>> {
        self.store.exhausted()
    }

    pub fn archived_jobs(&self, limit: usize, offset: usize) -> Result<Vec<ArchivedJob>> {
        self.store.list_archived(limit, offset)
    }

    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunSummary>> {
        self.store.list_run_log(limit)
    }

    /// Drop every queued job. Returns the number deleted.
    pub fn clear_queue(&self) -> Result<usize> {
        let deleted = self.store.clear()?;
        info!("Cleared {} jobs from the indexing queue", deleted);
        Ok(deleted)
    }

    // =========================================================================
    // Cycle phases
    // =========================================================================

    /// Cleaning: sweep exhausted jobs to the archive, prune the archive and
    /// run log, recover locks abandoned by dead workers.
    fn clean(&self) -> Result<()> {
        let exhausted = self.store.exhausted()?;
        if !exhausted.is_empty() {
            info!(
                "Sweeping {} jobs that exhausted their retry budget",
                exhausted.len()
            );
            // In verbose mode each failed attempt was archived as it
            // happened; archiving here again would duplicate the final one.
            if !self.settings.verbose_failure_archive {
                self.store.archive(&exhausted, ArchiveOutcome::Failed)?;
            }
            let ids: Vec<i64> = exhausted.iter().map(|r| r.id).collect();
            self.store.delete(&ids)?;
        }

        let now = chrono::Utc::now().timestamp();
        self.store
            .prune_archive(now - (self.settings.archive_retention_days * 86400) as i64)?;
        self.store
            .prune_run_log(now - (self.settings.run_log_retention_days * 86400) as i64)?;

        let reaped = self
            .store
            .reap_stale_locks(self.settings.stale_lock_threshold_secs as i64)?;
        if reaped > 0 {
            warn!("Recovered {} stale job locks", reaped);
        }
        Ok(())
    }

    /// Claiming + Executing + Reporting for one cycle.
    fn run_cycle(&self, max_jobs: usize, use_ratio: bool) -> Result<CycleOutcome> {
        let started_at = chrono::Utc::now().timestamp();
        let timer = Instant::now();

        let claimed = self.claim_batch(max_jobs, use_ratio)?;
        let claimed_count = claimed.len();
        let mut batch = merger::sort_and_merge(claimed, self.settings.max_batch_size);

        let mut processed = 0usize;
        let mut any_failed = false;
        for job in &mut batch {
            // Moving a temporary index into production must not happen while
            // its prerequisite content jobs are failing in this same run.
            if job.record.method == METHOD_MOVE_INDEX && any_failed {
                warn!(
                    "Deferring move_index job {} because an earlier job in this run failed",
                    job.record.id
                );
                self.store.release(&job.merged_ids)?;
                continue;
            }

            processed += 1;
            match job.execute(self.dispatcher.as_ref(), self.store.as_ref()) {
                Ok(()) => {
                    if self.settings.archive_completed {
                        self.store
                            .archive(&[job.archival_record()?], ArchiveOutcome::Succeeded)?;
                    }
                    self.store.delete(&job.merged_ids)?;
                }
                Err(e) => {
                    any_failed = true;
                    let message = format!("{:#}", e);
                    error!(
                        "Queue job {} ({} {}) failed (attempt {}/{}): {}",
                        job.record.id,
                        job.record.handler,
                        job.record.method,
                        job.record.retries,
                        job.record.max_retries,
                        message
                    );
                    self.store.record_failure(&job.merged_ids, &message)?;
                    if self.settings.verbose_failure_archive {
                        let mut record = job.archival_record()?;
                        record.error_log = Some(message);
                        self.store.archive(&[record], ArchiveOutcome::Failed)?;
                    }
                }
            }
        }

        let summary = RunSummary {
            started_at,
            processed_count: processed,
            duration_seconds: timer.elapsed().as_secs() as i64,
            ran_against_empty_queue: claimed_count < max_jobs,
        };
        self.store.append_run_log(&summary)?;
        info!(
            "Queue cycle processed {} jobs in {}s{}",
            summary.processed_count,
            summary.duration_seconds,
            if summary.ran_against_empty_queue {
                " (queue near-empty)"
            } else {
                ""
            }
        );

        Ok(CycleOutcome {
            summary,
            claimed: claimed_count,
        })
    }

    /// Claim up to `max_jobs` jobs, splitting the batch between the
    /// full-reindex and realtime lanes.
    ///
    /// The full-reindex lane gets `ceil(FULL_REINDEX_SHARE * max_jobs)`
    /// slots, realtime the rest. When realtime cannot fill its share the
    /// full-reindex lane tops the batch up, continuing past the ids already
    /// taken; the reverse backfill is deliberately absent (realtime
    /// freshness is protected over rebuild throughput).
    fn claim_batch(&self, max_jobs: usize, use_ratio: bool) -> Result<Vec<Job>> {
        if !use_ratio {
            return Ok(self.claim_lane(ClaimLane::Any, max_jobs, 0)?.jobs);
        }

        let full_limit =
            ((FULL_REINDEX_SHARE * max_jobs as f64).ceil() as usize).min(max_jobs);
        let full = self.claim_lane(ClaimLane::FullReindex, full_limit, 0)?;
        let realtime = self.claim_lane(ClaimLane::Realtime, max_jobs - full.jobs.len(), 0)?;

        let mut jobs = full.jobs;
        jobs.extend(realtime.jobs);

        if jobs.len() < max_jobs {
            let top_up =
                self.claim_lane(ClaimLane::FullReindex, max_jobs - jobs.len(), full.last_id)?;
            jobs.extend(top_up.jobs);
        }
        Ok(jobs)
    }

    /// Claim from one lane until `want` jobs are held after merging, or the
    /// lane runs out of rows.
    ///
    /// Merging can shrink a fetched page below the requested count, so this
    /// fetches, merges, and refetches past the last taken id until the
    /// merged count saturates.
    fn claim_lane(&self, lane: ClaimLane, want: usize, after_id: i64) -> Result<LaneClaim> {
        let mut jobs: Vec<Job> = Vec::new();
        let mut cursor = after_id;

        while jobs.len() < want {
            let page = self
                .store
                .claim_page(&self.owner, lane, want - jobs.len(), cursor)?;
            if page.is_empty() {
                break;
            }
            cursor = page.last().map(|r| r.id).unwrap_or(cursor);

            for record in page {
                let mut job = Job::new(record);
                if let Err(e) = job.prepare() {
                    // Execution will hit the same decode error and route it
                    // through the normal failure path.
                    warn!("{:#}", e);
                }
                jobs.push(job);
            }
            jobs = merger::sort_and_merge(jobs, self.settings.max_batch_size);
        }

        Ok(LaneClaim {
            jobs,
            last_id: cursor,
        })
    }
}
