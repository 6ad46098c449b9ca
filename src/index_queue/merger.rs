//! Batch ordering and merging.
//!
//! Pure pass over a claimed batch: barrier methods keep their original
//! relative order and never merge; the mergeable jobs between them are
//! sorted so merge candidates become adjacent, then folded pairwise.

use super::job::Job;
use std::cmp::Ordering;

/// Mergeable incremental upsert of entity records.
pub const METHOD_INDEX_ENTITIES: &str = "index_entities";
/// Barrier: bulk removal of entity records.
pub const METHOD_DELETE_ENTITIES: &str = "delete_entities";
/// Barrier: push index settings to the remote service.
pub const METHOD_APPLY_SETTINGS: &str = "apply_settings";
/// Barrier: swap a rebuilt temporary index into production. Also subject to
/// the scheduler's defer-on-earlier-failure rule.
pub const METHOD_MOVE_INDEX: &str = "move_index";

/// Operations that must preserve their relative enqueue order and never
/// merge with anything.
pub const BARRIER_METHODS: &[&str] = &[
    METHOD_APPLY_SETTINGS,
    METHOD_DELETE_ENTITIES,
    METHOD_MOVE_INDEX,
];

pub fn is_barrier_method(method: &str) -> bool {
    BARRIER_METHODS.contains(&method)
}

/// Order and merge a claimed batch for execution.
///
/// Walking the batch in claim order, every barrier job flushes the run of
/// mergeable jobs accumulated before it (sorted by `(handler, method,
/// store_id, id)` and pairwise-merged), then takes its own slot. This keeps
/// e.g. "apply settings" ahead of the indexing jobs enqueued after it, and
/// "move index" behind the ones enqueued before it, no matter how the
/// mergeable jobs regroup.
pub fn sort_and_merge(jobs: Vec<Job>, max_batch_size: usize) -> Vec<Job> {
    let mut out = Vec::with_capacity(jobs.len());
    let mut run: Vec<Job> = Vec::new();

    for job in jobs {
        if is_barrier_method(&job.record.method) {
            flush_run(&mut run, &mut out, max_batch_size);
            out.push(job);
        } else {
            run.push(job);
        }
    }
    flush_run(&mut run, &mut out, max_batch_size);
    out
}

fn merge_key_cmp(a: &Job, b: &Job) -> Ordering {
    (
        a.record.handler.as_str(),
        a.record.method.as_str(),
        a.store_id(),
        a.record.id,
    )
        .cmp(&(
            b.record.handler.as_str(),
            b.record.method.as_str(),
            b.store_id(),
            b.record.id,
        ))
}

fn flush_run(run: &mut Vec<Job>, out: &mut Vec<Job>, max_batch_size: usize) {
    if run.is_empty() {
        return;
    }
    run.sort_by(merge_key_cmp);

    let mut it = run.drain(..);
    // drain() of a non-empty vec always yields at least one item
    let mut current = match it.next() {
        Some(job) => job,
        None => return,
    };
    for next in it {
        if current.can_merge(&next, max_batch_size) {
            current.merge(next);
        } else {
            out.push(current);
            current = next;
        }
    }
    out.push(current);
}
