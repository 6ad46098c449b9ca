//! Database schema for index_queue.db.
//!
//! Defines versioned schema migrations for the indexing queue database.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema, DEFAULT_TIMESTAMP};

// =============================================================================
// Active queue - Version 0
// =============================================================================

const INDEX_QUEUE_TABLE_V1: Table = Table {
    name: "index_queue",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!(
            "created_at",
            &SqlType::Integer,
            non_null = true,
            default_value = Some(DEFAULT_TIMESTAMP)
        ),
        sqlite_column!("handler", &SqlType::Text, non_null = true),
        sqlite_column!("method", &SqlType::Text, non_null = true),
        sqlite_column!("payload", &SqlType::Text, non_null = true),
        sqlite_column!(
            "payload_size",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("1")
        ),
        sqlite_column!("lock_owner", &SqlType::Text),
        sqlite_column!("locked_at", &SqlType::Integer),
        sqlite_column!("retries", &SqlType::Integer, default_value = Some("0")),
        sqlite_column!("max_retries", &SqlType::Integer, default_value = Some("3")),
        sqlite_column!(
            "is_full_reindex",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("error_log", &SqlType::Text),
        sqlite_column!("debug_trace", &SqlType::Text),
    ],
    indices: &[
        // Claim predicate: unclaimed rows of one lane in id order
        ("idx_queue_claim", "lock_owner, is_full_reindex, id"),
        ("idx_queue_retries", "retries"),
        ("idx_queue_locked_at", "locked_at"),
    ],
};

/// Terminal copies of executed/exhausted jobs, for postmortem.
const INDEX_QUEUE_ARCHIVE_TABLE_V1: Table = Table {
    name: "index_queue_archive",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("job_id", &SqlType::Integer, non_null = true),
        sqlite_column!("created_at", &SqlType::Integer, non_null = true),
        sqlite_column!("handler", &SqlType::Text, non_null = true),
        sqlite_column!("method", &SqlType::Text, non_null = true),
        sqlite_column!("payload", &SqlType::Text, non_null = true),
        sqlite_column!("payload_size", &SqlType::Integer, non_null = true),
        sqlite_column!("retries", &SqlType::Integer, non_null = true),
        sqlite_column!("is_full_reindex", &SqlType::Integer, non_null = true),
        sqlite_column!("error_log", &SqlType::Text),
        sqlite_column!("outcome", &SqlType::Text, non_null = true),
        sqlite_column!("archived_at", &SqlType::Integer, non_null = true),
    ],
    indices: &[
        ("idx_archive_archived_at", "archived_at"),
        ("idx_archive_job", "job_id"),
    ],
};

/// One row per scheduling cycle, for throughput/stall monitoring.
const INDEX_QUEUE_RUN_LOG_TABLE_V1: Table = Table {
    name: "index_queue_run_log",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("started_at", &SqlType::Integer, non_null = true),
        sqlite_column!(
            "processed_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "duration_seconds",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!(
            "ran_against_empty_queue",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    indices: &[("idx_run_log_started_at", "started_at")],
};

pub const INDEX_QUEUE_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        INDEX_QUEUE_TABLE_V1,
        INDEX_QUEUE_ARCHIVE_TABLE_V1,
        INDEX_QUEUE_RUN_LOG_TABLE_V1,
    ],
    migration: None,
}];

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_schema_creates_and_validates() {
        let conn = Connection::open_in_memory().unwrap();

        let schema = &INDEX_QUEUE_VERSIONED_SCHEMAS[0];
        schema.create(&conn).expect("schema should create");
        schema.validate(&conn).expect("schema should validate");
    }

    #[test]
    fn test_all_tables_exist() {
        let conn = Connection::open_in_memory().unwrap();
        INDEX_QUEUE_VERSIONED_SCHEMAS[0].create(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(tables.contains(&"index_queue".to_string()));
        assert!(tables.contains(&"index_queue_archive".to_string()));
        assert!(tables.contains(&"index_queue_run_log".to_string()));
    }

    #[test]
    fn test_queue_row_defaults() {
        let conn = Connection::open_in_memory().unwrap();
        INDEX_QUEUE_VERSIONED_SCHEMAS[0].create(&conn).unwrap();

        conn.execute(
            r#"INSERT INTO index_queue (handler, method, payload)
               VALUES ('entity-indexer', 'index_entities', '{}')"#,
            [],
        )
        .unwrap();

        let (created_at, payload_size, retries, is_full): (i64, i64, i32, i32) = conn
            .query_row(
                "SELECT created_at, payload_size, retries, is_full_reindex FROM index_queue",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();

        assert!(created_at > 0, "created_at should default to now");
        assert_eq!(payload_size, 1);
        assert_eq!(retries, 0);
        assert_eq!(is_full, 0);
    }

    #[test]
    fn test_queue_ids_are_monotonic() {
        let conn = Connection::open_in_memory().unwrap();
        INDEX_QUEUE_VERSIONED_SCHEMAS[0].create(&conn).unwrap();

        for _ in 0..3 {
            conn.execute(
                r#"INSERT INTO index_queue (handler, method, payload)
                   VALUES ('entity-indexer', 'index_entities', '{}')"#,
                [],
            )
            .unwrap();
        }

        let ids: Vec<i64> = conn
            .prepare("SELECT id FROM index_queue ORDER BY id")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_indexes_exist() {
        let conn = Connection::open_in_memory().unwrap();
        INDEX_QUEUE_VERSIONED_SCHEMAS[0].create(&conn).unwrap();

        let indexes: Vec<String> = conn
            .prepare(
                "SELECT name FROM sqlite_master WHERE type='index' AND name LIKE 'idx_%' ORDER BY name",
            )
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        assert!(indexes.contains(&"idx_queue_claim".to_string()));
        assert!(indexes.contains(&"idx_queue_retries".to_string()));
        assert!(indexes.contains(&"idx_queue_locked_at".to_string()));
        assert!(indexes.contains(&"idx_archive_archived_at".to_string()));
        assert!(indexes.contains(&"idx_archive_job".to_string()));
        assert!(indexes.contains(&"idx_run_log_started_at".to_string()));
    }
}
