//! Common test infrastructure
//!
//! Builds a real queue over a temporary on-disk database, with a scripted
//! dispatcher standing in for the indexing handlers. Tests should only
//! import from this module.

use anyhow::{bail, Result};
use indaco_indexer::config::QueueSettings;
use indaco_indexer::index_queue::{
    Dispatcher, EnqueueRequest, IndexQueue, JobPayload, SqliteQueueStore, METHOD_INDEX_ENTITIES,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// Dispatcher that records every invocation and fails the methods it has
/// been told to fail.
#[derive(Default)]
pub struct RecordingDispatcher {
    calls: Mutex<Vec<(String, String, JobPayload)>>,
    fail_methods: Mutex<HashSet<String>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_method(&self, method: &str) {
        self.fail_methods.lock().unwrap().insert(method.to_string());
    }

    pub fn unfail_method(&self, method: &str) {
        self.fail_methods.lock().unwrap().remove(method);
    }

    pub fn calls(&self) -> Vec<(String, String, JobPayload)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn methods_called(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(_, method, _)| method.clone())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

impl Dispatcher for RecordingDispatcher {
    fn invoke(&self, handler: &str, method: &str, payload: &JobPayload) -> Result<()> {
        self.calls
            .lock()
            .unwrap()
            .push((handler.to_string(), method.to_string(), payload.clone()));
        if self.fail_methods.lock().unwrap().contains(method) {
            bail!("scripted failure in {}", method);
        }
        Ok(())
    }
}

/// A queue over a real database file in a temp directory.
pub struct TestQueue {
    pub queue: IndexQueue,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub db_path: PathBuf,
    // Held so the directory outlives the queue
    _dir: TempDir,
}

impl TestQueue {
    pub fn spawn(settings: QueueSettings) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("index_queue.db");
        let store = Arc::new(SqliteQueueStore::new(&db_path).unwrap());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let queue = IndexQueue::new(store, dispatcher.clone(), settings);
        Self {
            queue,
            dispatcher,
            db_path,
            _dir: dir,
        }
    }

    /// A second worker against the same database file, sharing the
    /// dispatcher so invocation counts can be asserted across workers.
    pub fn second_worker(&self, settings: QueueSettings) -> IndexQueue {
        let store = Arc::new(SqliteQueueStore::new(&self.db_path).unwrap());
        IndexQueue::new(store, self.dispatcher.clone(), settings)
    }
}

/// A realtime single-store indexing request.
pub fn index_request(store_id: i64, entity_ids: &[i64]) -> EnqueueRequest {
    EnqueueRequest::new(
        "entity-indexer",
        METHOD_INDEX_ENTITIES,
        JobPayload::new()
            .with_store(store_id)
            .with_entity_ids(entity_ids.to_vec()),
    )
}
