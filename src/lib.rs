//! Indaco Indexer Library
//!
//! Keeps a remote search index in sync with catalog data through a durable,
//! SQLite-backed job queue. This library exposes the internal modules for
//! embedding and testing; the binary in `main.rs` is a thin worker around
//! them.

pub mod catalog_source;
pub mod config;
pub mod index_queue;
pub mod indexer;
pub mod sqlite_persistence;
pub mod worker;

// Re-export commonly used types for convenience
pub use catalog_source::{CatalogSource, EmptyCatalogSource};
pub use config::{AppConfig, CliConfig, FileConfig, QueueSettings};
pub use index_queue::{
    EnqueueOutcome, EnqueueRequest, HandlerRegistry, IndexQueue, JobPayload, QueueStore, RunLimit,
    SqliteQueueStore,
};
pub use indexer::{EntityIndexHandler, NoOpSearchClient, SearchClient, HANDLER_ENTITY_INDEXER};
pub use worker::QueueWorker;
