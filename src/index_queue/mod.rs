//! Persistent job queue for deferred indexing operations.
//!
//! Producers enqueue `(handler, method, payload)` rows; worker processes
//! claim bounded batches with row-level locking, merge overlapping jobs to
//! cut remote API calls, execute them in a barrier-respecting order, and
//! archive terminal outcomes for postmortem.

mod dispatcher;
mod job;
mod merger;
mod models;
mod queue;
mod schema;
mod store;

pub use dispatcher::{DispatchError, Dispatcher, HandlerRegistry, JobHandler};
pub use job::Job;
pub use merger::{
    is_barrier_method, sort_and_merge, BARRIER_METHODS, METHOD_APPLY_SETTINGS,
    METHOD_DELETE_ENTITIES, METHOD_INDEX_ENTITIES, METHOD_MOVE_INDEX,
};
pub use models::{
    ArchiveOutcome, ArchivedJob, ClaimLane, JobPayload, JobRecord, JobStatus, NewJob, QueueStats,
    RunSummary,
};
pub use queue::{EnqueueOutcome, EnqueueRequest, IndexQueue, RunLimit};
pub use schema::INDEX_QUEUE_VERSIONED_SCHEMAS;
pub use store::{QueueStore, SqliteQueueStore};
