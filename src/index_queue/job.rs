//! Runtime job entity.
//!
//! A `Job` wraps one queue row and, after merging, stands in for several of
//! them: `merged_ids` tracks every underlying row this logical unit of work
//! now represents.

use super::dispatcher::Dispatcher;
use super::models::{JobPayload, JobRecord, JobStatus};
use super::store::QueueStore;
use anyhow::{Context, Result};
use std::collections::BTreeSet;

#[derive(Debug, Clone)]
pub struct Job {
    pub record: JobRecord,
    /// Ids of every queue row this job represents. Never empty; always
    /// contains the record's own id.
    pub merged_ids: Vec<i64>,
    payload: Option<JobPayload>,
}

impl Job {
    pub fn new(record: JobRecord) -> Self {
        let merged_ids = vec![record.id];
        Self {
            record,
            merged_ids,
            payload: None,
        }
    }

    /// Decode the raw payload. Idempotent: subsequent calls are no-ops.
    pub fn prepare(&mut self) -> Result<()> {
        if self.payload.is_some() {
            return Ok(());
        }
        let payload = JobPayload::from_raw(&self.record.payload)
            .with_context(|| format!("Job {} has an undecodable payload", self.record.id))?;
        self.payload = Some(payload);
        Ok(())
    }

    pub fn payload(&self) -> Option<&JobPayload> {
        self.payload.as_ref()
    }

    pub fn store_id(&self) -> Option<i64> {
        self.payload.as_ref().and_then(|p| p.store_id)
    }

    pub fn entity_ids(&self) -> &[i64] {
        self.payload
            .as_ref()
            .map(|p| p.entity_ids.as_slice())
            .unwrap_or(&[])
    }

    pub fn status(&self) -> JobStatus {
        self.record.status()
    }

    /// Whether `other` can be folded into this job: same
    /// `(handler, method, store_id)`, both carry entity ids, and the
    /// deduplicated union stays within `max_batch_size`. Unprepared jobs
    /// never merge.
    pub fn can_merge(&self, other: &Job, max_batch_size: usize) -> bool {
        let (Some(own), Some(theirs)) = (self.payload.as_ref(), other.payload.as_ref()) else {
            return false;
        };
        if self.record.handler != other.record.handler
            || self.record.method != other.record.method
            || own.store_id != theirs.store_id
        {
            return false;
        }
        if own.entity_ids.is_empty() || theirs.entity_ids.is_empty() {
            return false;
        }
        let union: BTreeSet<i64> = own
            .entity_ids
            .iter()
            .chain(theirs.entity_ids.iter())
            .copied()
            .collect();
        union.len() <= max_batch_size
    }

    /// Fold `other` into this job. The caller must have checked
    /// [`Job::can_merge`]; `other` is consumed and its rows are represented
    /// by this job from now on. The resulting entity list is sorted and
    /// deduplicated, so merge output is order-independent.
    pub fn merge(&mut self, other: Job) {
        self.merged_ids.extend(other.merged_ids);

        if let (Some(own), Some(theirs)) = (self.payload.as_mut(), other.payload.as_ref()) {
            let union: BTreeSet<i64> = own
                .entity_ids
                .iter()
                .chain(theirs.entity_ids.iter())
                .copied()
                .collect();
            own.entity_ids = union.into_iter().collect();
            self.record.payload_size = own.entity_ids.len() as i64;
        }
    }

    /// Run this job through the dispatcher.
    ///
    /// The retry counter is incremented and persisted on every underlying
    /// row *before* anything else, so a worker crash mid-execution (or an
    /// undecodable payload) still consumes an attempt on the next cycle.
    /// Handler errors propagate to the caller untouched.
    pub fn execute(&mut self, dispatcher: &dyn Dispatcher, store: &dyn QueueStore) -> Result<()> {
        self.record.retries += 1;
        store.bump_retries(&self.merged_ids)?;

        self.prepare()?;
        let payload = self
            .payload
            .as_ref()
            .context("Job payload missing after prepare")?;
        dispatcher.invoke(&self.record.handler, &self.record.method, payload)
    }

    /// A copy of the underlying record with the payload column refreshed
    /// from the decoded (possibly merged) payload, suitable for archiving
    /// this job as one logical unit.
    pub fn archival_record(&self) -> Result<JobRecord> {
        let mut record = self.record.clone();
        if let Some(payload) = &self.payload {
            record.payload = payload.to_raw()?;
        }
        Ok(record)
    }
}
