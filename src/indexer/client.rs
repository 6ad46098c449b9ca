//! Remote search-index API boundary.

use anyhow::Result;
use tracing::debug;

/// Client for the remote search service.
///
/// The queue only needs these five operations; transport, authentication,
/// and batching-over-the-wire live behind the implementation.
pub trait SearchClient: Send + Sync {
    /// Upsert records into an index.
    fn save_records(&self, index: &str, records: &[serde_json::Value]) -> Result<()>;

    /// Remove records from an index by entity id.
    fn delete_records(&self, index: &str, entity_ids: &[i64]) -> Result<()>;

    /// Push index settings (ranking, facets, synonyms...).
    fn apply_settings(&self, index: &str, settings: &serde_json::Value) -> Result<()>;

    /// Atomically replace `destination` with `source`.
    fn move_index(&self, source: &str, destination: &str) -> Result<()>;

    /// Block until the service has applied all pending write tasks on an
    /// index.
    fn wait_for_tasks(&self, index: &str) -> Result<()>;
}

/// Client that accepts every operation without talking to anything.
///
/// Used when no search backend is wired up; lets the queue machinery run
/// (and drain) without side effects.
#[derive(Debug, Default)]
pub struct NoOpSearchClient;

impl SearchClient for NoOpSearchClient {
    fn save_records(&self, index: &str, records: &[serde_json::Value]) -> Result<()> {
        debug!("NoOpSearchClient: save {} records to {}", records.len(), index);
        Ok(())
    }

    fn delete_records(&self, index: &str, entity_ids: &[i64]) -> Result<()> {
        debug!(
            "NoOpSearchClient: delete {} records from {}",
            entity_ids.len(),
            index
        );
        Ok(())
    }

    fn apply_settings(&self, index: &str, _settings: &serde_json::Value) -> Result<()> {
        debug!("NoOpSearchClient: apply settings to {}", index);
        Ok(())
    }

    fn move_index(&self, source: &str, destination: &str) -> Result<()> {
        debug!("NoOpSearchClient: move {} -> {}", source, destination);
        Ok(())
    }

    fn wait_for_tasks(&self, index: &str) -> Result<()> {
        debug!("NoOpSearchClient: wait for tasks on {}", index);
        Ok(())
    }
}
