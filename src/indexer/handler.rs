//! The entity-indexer job handler.
//!
//! Maps the queue's method names onto the search client and catalog source.
//! This is the closed set of operations that can be queued against the
//! `entity-indexer` handler name.

use crate::catalog_source::CatalogSource;
use crate::index_queue::{
    DispatchError, JobHandler, JobPayload, METHOD_APPLY_SETTINGS, METHOD_DELETE_ENTITIES,
    METHOD_INDEX_ENTITIES, METHOD_MOVE_INDEX,
};
use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tracing::info;

use super::client::SearchClient;

/// Registry name this handler is mounted under.
pub const HANDLER_ENTITY_INDEXER: &str = "entity-indexer";

/// Payload key naming the rebuild target suffix (e.g. `_tmp`).
const KEY_INDEX_SUFFIX: &str = "index_suffix";
/// Payload key carrying settings for `apply_settings`.
const KEY_SETTINGS: &str = "settings";
/// Payload key naming the source index for `move_index`.
const KEY_SOURCE_INDEX: &str = "source_index";

pub struct EntityIndexHandler {
    client: Arc<dyn SearchClient>,
    catalog: Arc<dyn CatalogSource>,
    index_prefix: String,
}

impl EntityIndexHandler {
    pub fn new(
        client: Arc<dyn SearchClient>,
        catalog: Arc<dyn CatalogSource>,
        index_prefix: &str,
    ) -> Self {
        Self {
            client,
            catalog,
            index_prefix: index_prefix.to_string(),
        }
    }

    /// Production index name for a store: `{prefix}_store_{id}`.
    fn index_name(&self, payload: &JobPayload) -> Result<String> {
        let store_id = payload
            .store_id
            .context("payload is missing store_id")?;
        Ok(format!("{}_store_{}", self.index_prefix, store_id))
    }

    /// Target index: the production name plus an optional rebuild suffix.
    fn target_index(&self, payload: &JobPayload) -> Result<String> {
        let mut name = self.index_name(payload)?;
        if let Some(suffix) = payload.extra.get(KEY_INDEX_SUFFIX).and_then(|v| v.as_str()) {
            name.push_str(suffix);
        }
        Ok(name)
    }

    fn index_entities(&self, payload: &JobPayload) -> Result<()> {
        let store_id = payload.store_id.context("payload is missing store_id")?;
        let index = self.target_index(payload)?;
        let records = self.catalog.load_records(store_id, &payload.entity_ids)?;
        if records.is_empty() {
            info!(
                "No indexable records for {} entities of store {}, skipping",
                payload.entity_ids.len(),
                store_id
            );
            return Ok(());
        }
        self.client.save_records(&index, &records)
    }

    fn delete_entities(&self, payload: &JobPayload) -> Result<()> {
        if payload.entity_ids.is_empty() {
            bail!("delete_entities requires a non-empty entity_ids list");
        }
        let index = self.target_index(payload)?;
        self.client.delete_records(&index, &payload.entity_ids)
    }

    fn apply_settings(&self, payload: &JobPayload) -> Result<()> {
        let settings = payload
            .extra
            .get(KEY_SETTINGS)
            .context("apply_settings payload is missing 'settings'")?;
        let index = self.target_index(payload)?;
        self.client.apply_settings(&index, settings)
    }

    fn move_index(&self, payload: &JobPayload) -> Result<()> {
        let source = payload
            .extra
            .get(KEY_SOURCE_INDEX)
            .and_then(|v| v.as_str())
            .context("move_index payload is missing 'source_index'")?;
        let destination = self.index_name(payload)?;
        // The rebuild writes may still be in flight on the service side;
        // moving before they settle would publish a partial index.
        self.client.wait_for_tasks(source)?;
        info!("Moving index {} into place as {}", source, destination);
        self.client.move_index(source, &destination)
    }
}

impl JobHandler for EntityIndexHandler {
    fn invoke(&self, method: &str, payload: &JobPayload) -> Result<()> {
        match method {
            METHOD_INDEX_ENTITIES => self.index_entities(payload),
            METHOD_DELETE_ENTITIES => self.delete_entities(payload),
            METHOD_APPLY_SETTINGS => self.apply_settings(payload),
            METHOD_MOVE_INDEX => self.move_index(payload),
            _ => bail!(DispatchError::UnknownMethod {
                handler: HANDLER_ENTITY_INDEXER.to_string(),
                method: method.to_string(),
            }),
        }
    }
}
