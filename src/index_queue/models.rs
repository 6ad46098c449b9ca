//! Data models for the indexing queue.
//!
//! Defines persisted job rows, claim lanes, archive entries, run summaries,
//! and the decoded payload type shared with handlers.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Derived status of a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Unclaimed, waiting for a scheduling cycle.
    New,
    /// Claimed by a worker (or previously attempted and still under the
    /// retry limit).
    Processing,
    /// Retry budget exhausted, pending archival.
    Error,
}

/// Which scheduling lane a claim draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimLane {
    /// Incremental jobs produced by live data changes.
    Realtime,
    /// Jobs produced by bulk rebuild operations.
    FullReindex,
    /// No lane filter (drain mode).
    Any,
}

/// Terminal outcome recorded in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ArchiveOutcome {
    Succeeded,
    Failed,
}

impl ArchiveOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveOutcome::Succeeded => "SUCCEEDED",
            ArchiveOutcome::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUCCEEDED" => Some(ArchiveOutcome::Succeeded),
            "FAILED" => Some(ArchiveOutcome::Failed),
            _ => None,
        }
    }
}

/// A persisted queue row. One row per enqueued operation; merging collapses
/// several rows into one runtime [`crate::index_queue::Job`] without
/// rewriting them.
#[derive(Debug, Clone)]
pub struct JobRecord {
    /// Monotonic row id, used as tie-breaker and paging cursor.
    pub id: i64,
    /// When the row was enqueued (Unix timestamp).
    pub created_at: i64,
    /// Identifier of the handler that owns the operation.
    pub handler: String,
    /// Operation name on that handler.
    pub method: String,
    /// Serialized JSON parameters.
    pub payload: String,
    /// Unit count used for batch-size accounting.
    pub payload_size: i64,
    /// Claiming worker token; None means unclaimed.
    pub lock_owner: Option<String>,
    /// When the claim was taken (Unix timestamp).
    pub locked_at: Option<i64>,
    /// Attempts made so far.
    pub retries: i32,
    /// Retry budget, copied from configuration at enqueue time.
    pub max_retries: i32,
    /// Selects the full-reindex scheduling lane.
    pub is_full_reindex: bool,
    /// Last execution error, if any.
    pub error_log: Option<String>,
    /// Enqueue-site trace captured for diagnostics, if enabled.
    pub debug_trace: Option<String>,
}

impl JobRecord {
    /// Derived status per the lock/retry state.
    pub fn status(&self) -> JobStatus {
        if self.retries >= self.max_retries {
            JobStatus::Error
        } else if self.lock_owner.is_none() {
            JobStatus::New
        } else {
            JobStatus::Processing
        }
    }
}

/// Parameters for inserting a new queue row.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub handler: String,
    pub method: String,
    pub payload: String,
    pub payload_size: i64,
    pub max_retries: i32,
    pub is_full_reindex: bool,
    pub debug_trace: Option<String>,
}

/// A row moved to the archive table for postmortem.
#[derive(Debug, Clone)]
pub struct ArchivedJob {
    pub id: i64,
    /// Id the job had in the active queue.
    pub job_id: i64,
    pub created_at: i64,
    pub handler: String,
    pub method: String,
    pub payload: String,
    pub payload_size: i64,
    pub retries: i32,
    pub is_full_reindex: bool,
    pub error_log: Option<String>,
    pub outcome: ArchiveOutcome,
    pub archived_at: i64,
}

/// Summary row appended after each scheduling cycle.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: i64,
    pub processed_count: usize,
    pub duration_seconds: i64,
    pub ran_against_empty_queue: bool,
}

/// Queue counts for the operator surface.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub pending_realtime: usize,
    pub pending_full_reindex: usize,
    pub locked: usize,
    pub exhausted: usize,
    pub archived: usize,
}

/// Decoded job parameters.
///
/// The scheduler only interprets `store_id` (merge grouping) and
/// `entity_ids` (merge union and size accounting); everything else rides
/// along in `extra` untouched and is handler-specific.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity_ids: Vec<i64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl JobPayload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_store(mut self, store_id: i64) -> Self {
        self.store_id = Some(store_id);
        self
    }

    pub fn with_entity_ids(mut self, entity_ids: Vec<i64>) -> Self {
        self.entity_ids = entity_ids;
        self
    }

    pub fn with_extra(mut self, key: &str, value: serde_json::Value) -> Self {
        self.extra.insert(key.to_string(), value);
        self
    }

    /// Serialize to the JSON text stored in the queue row.
    pub fn to_raw(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize job payload")
    }

    /// Decode from the JSON text stored in the queue row.
    pub fn from_raw(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).context("Failed to decode job payload")
    }
}
