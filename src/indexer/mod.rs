mod client;
mod handler;

pub use client::{NoOpSearchClient, SearchClient};
pub use handler::{EntityIndexHandler, HANDLER_ENTITY_INDEXER};
