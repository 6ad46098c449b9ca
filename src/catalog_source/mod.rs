//! Catalog data boundary.
//!
//! The queue stores entity ids, not records; at execution time the handler
//! asks the catalog for the current indexable form of each entity. Whatever
//! backs the catalog (database, feed, upstream service) sits behind this
//! trait.

use anyhow::Result;

pub trait CatalogSource: Send + Sync {
    /// Load the indexable records for the given entities of one store.
    ///
    /// Entities that no longer exist are simply absent from the result;
    /// deletions travel through the queue as their own operation.
    fn load_records(&self, store_id: i64, entity_ids: &[i64]) -> Result<Vec<serde_json::Value>>;
}

/// Catalog with no entities. Used when no catalog backend is wired up.
#[derive(Debug, Default)]
pub struct EmptyCatalogSource;

impl CatalogSource for EmptyCatalogSource {
    fn load_records(&self, _store_id: i64, _entity_ids: &[i64]) -> Result<Vec<serde_json::Value>> {
        Ok(Vec::new())
    }
}
