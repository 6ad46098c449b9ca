//! Queue storage and persistence.
//!
//! Provides SQLite-backed storage for queued indexing jobs, the archive of
//! terminal jobs, and the per-cycle run log.

use super::models::*;
use super::schema::INDEX_QUEUE_VERSIONED_SCHEMAS;
use crate::sqlite_persistence::BASE_DB_VERSION;
use anyhow::{bail, Context, Result};
use rusqlite::{Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

/// Trait for queue storage operations.
///
/// The scheduler only ever talks to this interface; the two operations that
/// matter for correctness are `claim_page` (atomic read-then-lock) and
/// `release`. Everything else is bookkeeping around them.
pub trait QueueStore: Send + Sync {
    // === Queue rows ===

    /// Insert a new job row. Returns the assigned id.
    fn insert(&self, job: NewJob) -> Result<i64>;

    /// Get a job row by id.
    fn get(&self, id: i64) -> Result<Option<JobRecord>>;

    /// Atomically claim up to `limit` unclaimed rows of the given lane with
    /// ids greater than `after_id`, in ascending id order. Claimed rows are
    /// stamped with `owner` before the transaction commits, so no concurrent
    /// worker can claim the same rows.
    fn claim_page(
        &self,
        owner: &str,
        lane: ClaimLane,
        limit: usize,
        after_id: i64,
    ) -> Result<Vec<JobRecord>>;

    /// Clear the lock on the given rows, keeping them queued.
    fn release(&self, ids: &[i64]) -> Result<()>;

    /// Delete the given rows from the active queue.
    fn delete(&self, ids: &[i64]) -> Result<()>;

    /// Increment the retry counter on the given rows.
    fn bump_retries(&self, ids: &[i64]) -> Result<()>;

    /// Record an execution failure: store the error text and release the
    /// lock so the rows are retried on a future cycle.
    fn record_failure(&self, ids: &[i64], error: &str) -> Result<()>;

    /// Rows whose retry budget is exhausted (`retries >= max_retries`).
    fn exhausted(&self) -> Result<Vec<JobRecord>>;

    /// Clear locks older than `threshold_secs`. Returns the number of rows
    /// recovered.
    fn reap_stale_locks(&self, threshold_secs: i64) -> Result<usize>;

    /// Remove every row from the active queue. Returns the number deleted.
    fn clear(&self) -> Result<usize>;

    // === Archive ===

    /// Copy the given rows into the archive with the given outcome.
    fn archive(&self, records: &[JobRecord], outcome: ArchiveOutcome) -> Result<()>;

    /// List archived jobs, most recent first.
    fn list_archived(&self, limit: usize, offset: usize) -> Result<Vec<ArchivedJob>>;

    /// Delete archive rows older than `before`. Returns the number deleted.
    fn prune_archive(&self, before: i64) -> Result<usize>;

    // === Run log ===

    /// Append a cycle summary. Returns the row id.
    fn append_run_log(&self, summary: &RunSummary) -> Result<i64>;

    /// List recent cycle summaries, most recent first.
    fn list_run_log(&self, limit: usize) -> Result<Vec<RunSummary>>;

    /// Delete run-log rows older than `before`. Returns the number deleted.
    fn prune_run_log(&self, before: i64) -> Result<usize>;

    // === Statistics ===

    /// Queue counts for the operator surface.
    fn stats(&self) -> Result<QueueStats>;
}

/// SQLite-backed queue store.
pub struct SqliteQueueStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteQueueStore {
    /// Open an existing database or create a new one with the current
    /// schema.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = if db_path.as_ref().exists() {
            Connection::open_with_flags(
                &db_path,
                rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                    | rusqlite::OpenFlags::SQLITE_OPEN_URI
                    | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?
        } else {
            let conn = Connection::open(&db_path)?;
            INDEX_QUEUE_VERSIONED_SCHEMAS
                .last()
                .context("No schemas defined")?
                .create(&conn)?;
            info!("Created new index queue database at {:?}", db_path.as_ref());
            conn
        };

        // Concurrent workers poll the same file; wait out their write locks
        // instead of surfacing SQLITE_BUSY.
        conn.busy_timeout(Duration::from_secs(5))?;

        let db_version = conn
            .query_row("PRAGMA user_version;", [], |row| row.get::<usize, i64>(0))
            .context("Failed to read database version")?
            - BASE_DB_VERSION as i64;

        if db_version < 0 {
            bail!(
                "Index queue database version {} is too old, does not contain base db version {}",
                db_version,
                BASE_DB_VERSION
            );
        }
        let version = db_version as usize;

        let schema_count = INDEX_QUEUE_VERSIONED_SCHEMAS.len();
        if version >= schema_count {
            bail!(
                "Index queue database version {} is too new (max supported: {})",
                version,
                schema_count - 1
            );
        }

        INDEX_QUEUE_VERSIONED_SCHEMAS
            .get(version)
            .context("Failed to get schema")?
            .validate(&conn)?;

        Self::migrate_if_needed(&conn, version)?;

        Ok(SqliteQueueStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store for testing.
    #[cfg(test)]
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        INDEX_QUEUE_VERSIONED_SCHEMAS
            .last()
            .context("No schemas defined")?
            .create(&conn)?;

        Ok(SqliteQueueStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run any pending migrations.
    fn migrate_if_needed(conn: &Connection, current_version: usize) -> Result<()> {
        let target_version = INDEX_QUEUE_VERSIONED_SCHEMAS.len() - 1;

        if current_version >= target_version {
            return Ok(());
        }

        info!(
            "Migrating index queue database from version {} to {}",
            current_version, target_version
        );

        for schema in INDEX_QUEUE_VERSIONED_SCHEMAS
            .iter()
            .skip(current_version + 1)
        {
            if let Some(migration_fn) = schema.migration {
                info!("Running index queue migration to version {}", schema.version);
                migration_fn(conn)?;
            }
        }

        conn.execute(
            &format!("PRAGMA user_version = {}", BASE_DB_VERSION + target_version),
            [],
        )?;

        Ok(())
    }

    /// Helper to convert a database row to a JobRecord.
    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<JobRecord> {
        Ok(JobRecord {
            id: row.get("id")?,
            created_at: row.get("created_at")?,
            handler: row.get("handler")?,
            method: row.get("method")?,
            payload: row.get("payload")?,
            payload_size: row.get("payload_size")?,
            lock_owner: row.get("lock_owner")?,
            locked_at: row.get("locked_at")?,
            retries: row.get("retries")?,
            max_retries: row.get("max_retries")?,
            is_full_reindex: row.get::<_, i64>("is_full_reindex")? != 0,
            error_log: row.get("error_log")?,
            debug_trace: row.get("debug_trace")?,
        })
    }

    fn row_to_archived(row: &rusqlite::Row) -> rusqlite::Result<ArchivedJob> {
        Ok(ArchivedJob {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            created_at: row.get("created_at")?,
            handler: row.get("handler")?,
            method: row.get("method")?,
            payload: row.get("payload")?,
            payload_size: row.get("payload_size")?,
            retries: row.get("retries")?,
            is_full_reindex: row.get::<_, i64>("is_full_reindex")? != 0,
            error_log: row.get("error_log")?,
            outcome: ArchiveOutcome::parse(&row.get::<_, String>("outcome")?)
                .unwrap_or(ArchiveOutcome::Failed),
            archived_at: row.get("archived_at")?,
        })
    }

    /// SQL fragment restricting a query to one claim lane.
    fn lane_predicate(lane: ClaimLane) -> &'static str {
        match lane {
            ClaimLane::Realtime => " AND is_full_reindex = 0",
            ClaimLane::FullReindex => " AND is_full_reindex = 1",
            ClaimLane::Any => "",
        }
    }

    /// `?, ?, ...` placeholder list for an id set.
    fn placeholders(count: usize) -> String {
        vec!["?"; count].join(", ")
    }

    /// Get current timestamp in seconds.
    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

impl QueueStore for SqliteQueueStore {
    fn insert(&self, job: NewJob) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO index_queue (
                created_at, handler, method, payload, payload_size,
                max_retries, is_full_reindex, debug_trace
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"#,
            rusqlite::params![
                Self::now(),
                job.handler,
                job.method,
                job.payload,
                job.payload_size,
                job.max_retries,
                job.is_full_reindex as i64,
                job.debug_trace,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn get(&self, id: i64) -> Result<Option<JobRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT * FROM index_queue WHERE id = ?1")?;
        let record = stmt.query_row([id], Self::row_to_record).optional()?;
        Ok(record)
    }

    fn claim_page(
        &self,
        owner: &str,
        lane: ClaimLane,
        limit: usize,
        after_id: i64,
    ) -> Result<Vec<JobRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.lock().unwrap();
        // IMMEDIATE takes the database write lock before the SELECT, so the
        // read-then-stamp pair is atomic across worker processes.
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let mut records = {
            let sql = format!(
                r#"SELECT * FROM index_queue
                   WHERE lock_owner IS NULL AND retries < max_retries AND id > ?1{}
                   ORDER BY id ASC
                   LIMIT ?2"#,
                Self::lane_predicate(lane)
            );
            let mut stmt = tx.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params![after_id, limit as i64], Self::row_to_record)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };

        if !records.is_empty() {
            let locked_at = Self::now();
            let sql = format!(
                "UPDATE index_queue SET lock_owner = ?1, locked_at = ?2 WHERE id IN ({})",
                Self::placeholders(records.len())
            );
            let mut params: Vec<Box<dyn rusqlite::ToSql>> =
                vec![Box::new(owner.to_string()), Box::new(locked_at)];
            for record in &records {
                params.push(Box::new(record.id));
            }
            let params_refs: Vec<&dyn rusqlite::ToSql> =
                params.iter().map(|p| p.as_ref()).collect();
            tx.execute(&sql, params_refs.as_slice())?;

            for record in &mut records {
                record.lock_owner = Some(owner.to_string());
                record.locked_at = Some(locked_at);
            }
        }

        tx.commit()?;
        Ok(records)
    }

    fn release(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "UPDATE index_queue SET lock_owner = NULL, locked_at = NULL WHERE id IN ({})",
            Self::placeholders(ids.len())
        );
        conn.execute(&sql, rusqlite::params_from_iter(ids.iter()))?;
        Ok(())
    }

    fn delete(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "DELETE FROM index_queue WHERE id IN ({})",
            Self::placeholders(ids.len())
        );
        conn.execute(&sql, rusqlite::params_from_iter(ids.iter()))?;
        Ok(())
    }

    fn bump_retries(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            "UPDATE index_queue SET retries = retries + 1 WHERE id IN ({})",
            Self::placeholders(ids.len())
        );
        conn.execute(&sql, rusqlite::params_from_iter(ids.iter()))?;
        Ok(())
    }

    fn record_failure(&self, ids: &[i64], error: &str) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock().unwrap();
        let sql = format!(
            r#"UPDATE index_queue
               SET error_log = ?1, lock_owner = NULL, locked_at = NULL
               WHERE id IN ({})"#,
            Self::placeholders(ids.len())
        );
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(error.to_string())];
        for id in ids {
            params.push(Box::new(*id));
        }
        let params_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        conn.execute(&sql, params_refs.as_slice())?;
        Ok(())
    }

    fn exhausted(&self) -> Result<Vec<JobRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT * FROM index_queue WHERE retries >= max_retries ORDER BY id ASC",
        )?;
        let records = stmt
            .query_map([], Self::row_to_record)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn reap_stale_locks(&self, threshold_secs: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let cutoff = Self::now() - threshold_secs;
        let reaped = conn.execute(
            r#"UPDATE index_queue
               SET lock_owner = NULL, locked_at = NULL
               WHERE lock_owner IS NOT NULL AND locked_at < ?1"#,
            [cutoff],
        )?;
        Ok(reaped)
    }

    fn clear(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute("DELETE FROM index_queue", [])?;
        Ok(deleted)
    }

    fn archive(&self, records: &[JobRecord], outcome: ArchiveOutcome) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let archived_at = Self::now();
        for record in records {
            tx.execute(
                r#"INSERT INTO index_queue_archive (
                    job_id, created_at, handler, method, payload, payload_size,
                    retries, is_full_reindex, error_log, outcome, archived_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
                rusqlite::params![
                    record.id,
                    record.created_at,
                    record.handler,
                    record.method,
                    record.payload,
                    record.payload_size,
                    record.retries,
                    record.is_full_reindex as i64,
                    record.error_log,
                    outcome.as_str(),
                    archived_at,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn list_archived(&self, limit: usize, offset: usize) -> Result<Vec<ArchivedJob>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT * FROM index_queue_archive
               ORDER BY archived_at DESC, id DESC
               LIMIT ?1 OFFSET ?2"#,
        )?;
        let rows = stmt
            .query_map(
                rusqlite::params![limit as i64, offset as i64],
                Self::row_to_archived,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn prune_archive(&self, before: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM index_queue_archive WHERE archived_at < ?1",
            [before],
        )?;
        Ok(deleted)
    }

    fn append_run_log(&self, summary: &RunSummary) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            r#"INSERT INTO index_queue_run_log (
                started_at, processed_count, duration_seconds, ran_against_empty_queue
            ) VALUES (?1, ?2, ?3, ?4)"#,
            rusqlite::params![
                summary.started_at,
                summary.processed_count as i64,
                summary.duration_seconds,
                summary.ran_against_empty_queue as i64,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn list_run_log(&self, limit: usize) -> Result<Vec<RunSummary>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            r#"SELECT started_at, processed_count, duration_seconds, ran_against_empty_queue
               FROM index_queue_run_log
               ORDER BY started_at DESC, id DESC
               LIMIT ?1"#,
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok(RunSummary {
                    started_at: row.get(0)?,
                    processed_count: row.get::<_, i64>(1)? as usize,
                    duration_seconds: row.get(2)?,
                    ran_against_empty_queue: row.get::<_, i64>(3)? != 0,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn prune_run_log(&self, before: i64) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM index_queue_run_log WHERE started_at < ?1",
            [before],
        )?;
        Ok(deleted)
    }

    fn stats(&self) -> Result<QueueStats> {
        let conn = self.conn.lock().unwrap();
        let count = |sql: &str| -> Result<usize> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n as usize)
        };
        Ok(QueueStats {
            pending_realtime: count(
                "SELECT COUNT(*) FROM index_queue WHERE lock_owner IS NULL AND retries < max_retries AND is_full_reindex = 0",
            )?,
            pending_full_reindex: count(
                "SELECT COUNT(*) FROM index_queue WHERE lock_owner IS NULL AND retries < max_retries AND is_full_reindex = 1",
            )?,
            locked: count("SELECT COUNT(*) FROM index_queue WHERE lock_owner IS NOT NULL")?,
            exhausted: count("SELECT COUNT(*) FROM index_queue WHERE retries >= max_retries")?,
            archived: count("SELECT COUNT(*) FROM index_queue_archive")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn new_job(handler: &str, method: &str, full: bool) -> NewJob {
        NewJob {
            handler: handler.to_string(),
            method: method.to_string(),
            payload: "{}".to_string(),
            payload_size: 1,
            max_retries: 3,
            is_full_reindex: full,
            debug_trace: None,
        }
    }

    #[test]
    fn test_create_new_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("index_queue.db");

        let _store = SqliteQueueStore::new(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_open_existing_database() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("index_queue.db");

        let id = {
            let store = SqliteQueueStore::new(&db_path).unwrap();
            store.insert(new_job("entity-indexer", "index_entities", false)).unwrap()
        };

        let store = SqliteQueueStore::new(&db_path).unwrap();
        let record = store.get(id).unwrap().unwrap();
        assert_eq!(record.handler, "entity-indexer");
    }

    #[test]
    fn test_insert_and_get() {
        let store = SqliteQueueStore::in_memory().unwrap();

        let mut job = new_job("entity-indexer", "index_entities", true);
        job.payload = r#"{"store_id":1,"entity_ids":[5,6]}"#.to_string();
        job.payload_size = 2;
        job.debug_trace = Some("enqueue at foo.rs:42".to_string());

        let id = store.insert(job).unwrap();
        let record = store.get(id).unwrap().unwrap();

        assert_eq!(record.id, id);
        assert_eq!(record.method, "index_entities");
        assert_eq!(record.payload_size, 2);
        assert_eq!(record.retries, 0);
        assert_eq!(record.max_retries, 3);
        assert!(record.is_full_reindex);
        assert!(record.lock_owner.is_none());
        assert_eq!(record.debug_trace.as_deref(), Some("enqueue at foo.rs:42"));
        assert!(record.created_at > 0);
    }

    #[test]
    fn test_get_missing_returns_none() {
        let store = SqliteQueueStore::in_memory().unwrap();
        assert!(store.get(12345).unwrap().is_none());
    }

    #[test]
    fn test_claim_page_stamps_owner() {
        let store = SqliteQueueStore::in_memory().unwrap();
        for _ in 0..3 {
            store.insert(new_job("entity-indexer", "index_entities", false)).unwrap();
        }

        let claimed = store.claim_page("worker-1", ClaimLane::Any, 2, 0).unwrap();
        assert_eq!(claimed.len(), 2);
        for record in &claimed {
            assert_eq!(record.lock_owner.as_deref(), Some("worker-1"));
            assert!(record.locked_at.is_some());
        }

        // Stamps are persisted, not just reflected in the return value
        let persisted = store.get(claimed[0].id).unwrap().unwrap();
        assert_eq!(persisted.lock_owner.as_deref(), Some("worker-1"));
    }

    #[test]
    fn test_claim_page_skips_claimed_rows() {
        let store = SqliteQueueStore::in_memory().unwrap();
        for _ in 0..4 {
            store.insert(new_job("entity-indexer", "index_entities", false)).unwrap();
        }

        let first = store.claim_page("worker-1", ClaimLane::Any, 2, 0).unwrap();
        let second = store.claim_page("worker-2", ClaimLane::Any, 10, 0).unwrap();

        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 2);
        let first_ids: Vec<i64> = first.iter().map(|r| r.id).collect();
        for record in &second {
            assert!(!first_ids.contains(&record.id));
        }
    }

    #[test]
    fn test_claim_page_lane_filter() {
        let store = SqliteQueueStore::in_memory().unwrap();
        store.insert(new_job("entity-indexer", "index_entities", false)).unwrap();
        store.insert(new_job("entity-indexer", "index_entities", true)).unwrap();
        store.insert(new_job("entity-indexer", "index_entities", true)).unwrap();

        let full = store
            .claim_page("worker-1", ClaimLane::FullReindex, 10, 0)
            .unwrap();
        assert_eq!(full.len(), 2);
        assert!(full.iter().all(|r| r.is_full_reindex));

        let realtime = store
            .claim_page("worker-1", ClaimLane::Realtime, 10, 0)
            .unwrap();
        assert_eq!(realtime.len(), 1);
        assert!(!realtime[0].is_full_reindex);
    }

    #[test]
    fn test_claim_page_respects_after_id_cursor() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(store.insert(new_job("entity-indexer", "index_entities", false)).unwrap());
        }

        let claimed = store
            .claim_page("worker-1", ClaimLane::Any, 10, ids[0])
            .unwrap();
        let claimed_ids: Vec<i64> = claimed.iter().map(|r| r.id).collect();
        assert_eq!(claimed_ids, vec![ids[1], ids[2]]);
    }

    #[test]
    fn test_claim_page_excludes_exhausted_rows() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let id = store.insert(new_job("entity-indexer", "index_entities", false)).unwrap();
        for _ in 0..3 {
            store.bump_retries(&[id]).unwrap();
        }

        let claimed = store.claim_page("worker-1", ClaimLane::Any, 10, 0).unwrap();
        assert!(claimed.is_empty());
    }

    #[test]
    fn test_claim_page_zero_limit() {
        let store = SqliteQueueStore::in_memory().unwrap();
        store.insert(new_job("entity-indexer", "index_entities", false)).unwrap();
        let claimed = store.claim_page("worker-1", ClaimLane::Any, 0, 0).unwrap();
        assert!(claimed.is_empty());
    }

    #[test]
    fn test_claims_disjoint_across_store_handles() {
        // Two stores over the same database file, as two worker processes
        // would open it.
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("index_queue.db");

        let store_a = SqliteQueueStore::new(&db_path).unwrap();
        for _ in 0..6 {
            store_a.insert(new_job("entity-indexer", "index_entities", false)).unwrap();
        }
        let store_b = SqliteQueueStore::new(&db_path).unwrap();

        let a = store_a.claim_page("worker-a", ClaimLane::Any, 3, 0).unwrap();
        let b = store_b.claim_page("worker-b", ClaimLane::Any, 10, 0).unwrap();

        assert_eq!(a.len(), 3);
        assert_eq!(b.len(), 3);
        let a_ids: Vec<i64> = a.iter().map(|r| r.id).collect();
        assert!(b.iter().all(|r| !a_ids.contains(&r.id)));
    }

    #[test]
    fn test_release_makes_rows_claimable_again() {
        let store = SqliteQueueStore::in_memory().unwrap();
        store.insert(new_job("entity-indexer", "index_entities", false)).unwrap();

        let claimed = store.claim_page("worker-1", ClaimLane::Any, 1, 0).unwrap();
        let ids: Vec<i64> = claimed.iter().map(|r| r.id).collect();

        assert!(store.claim_page("worker-2", ClaimLane::Any, 1, 0).unwrap().is_empty());
        store.release(&ids).unwrap();
        assert_eq!(store.claim_page("worker-2", ClaimLane::Any, 1, 0).unwrap().len(), 1);
    }

    #[test]
    fn test_delete_removes_rows() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let id1 = store.insert(new_job("entity-indexer", "index_entities", false)).unwrap();
        let id2 = store.insert(new_job("entity-indexer", "index_entities", false)).unwrap();

        store.delete(&[id1]).unwrap();
        assert!(store.get(id1).unwrap().is_none());
        assert!(store.get(id2).unwrap().is_some());
    }

    #[test]
    fn test_record_failure_sets_error_and_releases() {
        let store = SqliteQueueStore::in_memory().unwrap();
        store.insert(new_job("entity-indexer", "index_entities", false)).unwrap();

        let claimed = store.claim_page("worker-1", ClaimLane::Any, 1, 0).unwrap();
        let ids: Vec<i64> = claimed.iter().map(|r| r.id).collect();
        store.bump_retries(&ids).unwrap();
        store.record_failure(&ids, "search API timed out").unwrap();

        let record = store.get(ids[0]).unwrap().unwrap();
        assert_eq!(record.error_log.as_deref(), Some("search API timed out"));
        assert!(record.lock_owner.is_none());
        assert_eq!(record.retries, 1);
    }

    #[test]
    fn test_exhausted_lists_only_spent_rows() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let spent = store.insert(new_job("entity-indexer", "index_entities", false)).unwrap();
        let fresh = store.insert(new_job("entity-indexer", "index_entities", false)).unwrap();
        for _ in 0..3 {
            store.bump_retries(&[spent]).unwrap();
        }

        let exhausted = store.exhausted().unwrap();
        assert_eq!(exhausted.len(), 1);
        assert_eq!(exhausted[0].id, spent);
        assert_ne!(exhausted[0].id, fresh);
    }

    #[test]
    fn test_reap_stale_locks() {
        let store = SqliteQueueStore::in_memory().unwrap();
        store.insert(new_job("entity-indexer", "index_entities", false)).unwrap();
        store.insert(new_job("entity-indexer", "index_entities", false)).unwrap();

        let claimed = store.claim_page("worker-1", ClaimLane::Any, 2, 0).unwrap();

        // Backdate one lock beyond the threshold
        {
            let conn = store.conn.lock().unwrap();
            conn.execute(
                "UPDATE index_queue SET locked_at = locked_at - 10000 WHERE id = ?1",
                [claimed[0].id],
            )
            .unwrap();
        }

        let reaped = store.reap_stale_locks(900).unwrap();
        assert_eq!(reaped, 1);

        let recovered = store.get(claimed[0].id).unwrap().unwrap();
        assert!(recovered.lock_owner.is_none());
        let still_locked = store.get(claimed[1].id).unwrap().unwrap();
        assert_eq!(still_locked.lock_owner.as_deref(), Some("worker-1"));
    }

    #[test]
    fn test_archive_and_list() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let id = store.insert(new_job("entity-indexer", "index_entities", false)).unwrap();
        let mut record = store.get(id).unwrap().unwrap();
        record.error_log = Some("boom".to_string());

        store.archive(&[record], ArchiveOutcome::Failed).unwrap();

        let archived = store.list_archived(10, 0).unwrap();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].job_id, id);
        assert_eq!(archived[0].outcome, ArchiveOutcome::Failed);
        assert_eq!(archived[0].error_log.as_deref(), Some("boom"));
    }

    #[test]
    fn test_prune_archive() {
        let store = SqliteQueueStore::in_memory().unwrap();
        let id = store.insert(new_job("entity-indexer", "index_entities", false)).unwrap();
        let record = store.get(id).unwrap().unwrap();
        store.archive(&[record], ArchiveOutcome::Succeeded).unwrap();

        // Nothing older than the epoch of the rows themselves
        assert_eq!(store.prune_archive(0).unwrap(), 0);
        // Everything older than far-future cutoff
        assert_eq!(store.prune_archive(i64::MAX).unwrap(), 1);
        assert!(store.list_archived(10, 0).unwrap().is_empty());
    }

    #[test]
    fn test_run_log_append_list_prune() {
        let store = SqliteQueueStore::in_memory().unwrap();

        store
            .append_run_log(&RunSummary {
                started_at: 1000,
                processed_count: 7,
                duration_seconds: 2,
                ran_against_empty_queue: false,
            })
            .unwrap();
        store
            .append_run_log(&RunSummary {
                started_at: 2000,
                processed_count: 0,
                duration_seconds: 0,
                ran_against_empty_queue: true,
            })
            .unwrap();

        let log = store.list_run_log(10).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].started_at, 2000);
        assert!(log[0].ran_against_empty_queue);
        assert_eq!(log[1].processed_count, 7);

        assert_eq!(store.prune_run_log(1500).unwrap(), 1);
        assert_eq!(store.list_run_log(10).unwrap().len(), 1);
    }

    #[test]
    fn test_stats() {
        let store = SqliteQueueStore::in_memory().unwrap();
        store.insert(new_job("entity-indexer", "index_entities", false)).unwrap();
        store.insert(new_job("entity-indexer", "index_entities", true)).unwrap();
        let spent = store.insert(new_job("entity-indexer", "index_entities", false)).unwrap();
        for _ in 0..3 {
            store.bump_retries(&[spent]).unwrap();
        }
        store.claim_page("worker-1", ClaimLane::FullReindex, 1, 0).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.pending_realtime, 1);
        assert_eq!(stats.pending_full_reindex, 0); // claimed
        assert_eq!(stats.locked, 1);
        assert_eq!(stats.exhausted, 1);
        assert_eq!(stats.archived, 0);
    }

    #[test]
    fn test_clear() {
        let store = SqliteQueueStore::in_memory().unwrap();
        for _ in 0..5 {
            store.insert(new_job("entity-indexer", "index_entities", false)).unwrap();
        }
        assert_eq!(store.clear().unwrap(), 5);
        assert!(store.claim_page("worker-1", ClaimLane::Any, 10, 0).unwrap().is_empty());
    }
}
