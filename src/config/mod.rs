mod file_config;

pub use file_config::{FileConfig, IndexQueueConfig};

use anyhow::{bail, Result};
use std::path::PathBuf;

/// Share of each claimed batch reserved for full-reindex jobs, balancing
/// bulk-rebuild throughput against incremental freshness. Kept as a fixed
/// constant; see DESIGN.md before turning it into a setting.
pub const FULL_REINDEX_SHARE: f64 = 0.33;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub cycle_interval_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub cycle_interval_secs: u64,

    // Feature configs (with defaults)
    pub queue: QueueSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via the CLI or in the config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let cycle_interval_secs = file.cycle_interval_secs.unwrap_or(cli.cycle_interval_secs);

        let queue = QueueSettings::from_file(file.queue.unwrap_or_default());
        queue.validate()?;

        Ok(Self {
            db_dir,
            cycle_interval_secs,
            queue,
        })
    }
}

/// Settings consumed by the indexing queue.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    /// When false, enqueue executes inline and timer-driven cycles are
    /// skipped (a forced run still works).
    pub enabled: bool,
    /// How many jobs one scheduling cycle claims.
    pub jobs_per_cycle: usize,
    /// Retry budget stamped on each job at enqueue time.
    pub max_retries: u32,
    /// Cap on the merged entity-id union of a single job.
    pub max_batch_size: usize,
    /// Locks older than this are considered abandoned by a dead worker.
    pub stale_lock_threshold_secs: u64,
    /// How long archive rows are kept.
    pub archive_retention_days: u64,
    /// How long run-log rows are kept.
    pub run_log_retention_days: u64,
    /// Archive successful jobs before deleting them.
    pub archive_completed: bool,
    /// Archive every failed attempt instead of only the final one.
    pub verbose_failure_archive: bool,
    /// Capture an enqueue-site trace on each inserted job.
    pub capture_debug_traces: bool,
    /// Prefix for remote index names (`{prefix}_store_{id}`).
    pub index_prefix: String,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            jobs_per_cycle: 100,
            max_retries: 3,
            max_batch_size: 300,
            stale_lock_threshold_secs: 900,
            archive_retention_days: 30,
            run_log_retention_days: 14,
            archive_completed: false,
            verbose_failure_archive: false,
            capture_debug_traces: false,
            index_prefix: "catalog".to_string(),
        }
    }
}

impl QueueSettings {
    pub fn from_file(file: IndexQueueConfig) -> Self {
        let defaults = Self::default();
        Self {
            enabled: file.enabled.unwrap_or(defaults.enabled),
            jobs_per_cycle: file.jobs_per_cycle.unwrap_or(defaults.jobs_per_cycle),
            max_retries: file.max_retries.unwrap_or(defaults.max_retries),
            max_batch_size: file.max_batch_size.unwrap_or(defaults.max_batch_size),
            stale_lock_threshold_secs: file
                .stale_lock_threshold_secs
                .unwrap_or(defaults.stale_lock_threshold_secs),
            archive_retention_days: file
                .archive_retention_days
                .unwrap_or(defaults.archive_retention_days),
            run_log_retention_days: file
                .run_log_retention_days
                .unwrap_or(defaults.run_log_retention_days),
            archive_completed: file.archive_completed.unwrap_or(defaults.archive_completed),
            verbose_failure_archive: file
                .verbose_failure_archive
                .unwrap_or(defaults.verbose_failure_archive),
            capture_debug_traces: file
                .capture_debug_traces
                .unwrap_or(defaults.capture_debug_traces),
            index_prefix: file.index_prefix.unwrap_or(defaults.index_prefix),
        }
    }

    /// A zero batch size would make every cycle silently process nothing;
    /// fail loudly instead.
    pub fn validate(&self) -> Result<()> {
        if self.jobs_per_cycle == 0 {
            bail!("queue.jobs_per_cycle must be greater than zero");
        }
        if self.max_batch_size == 0 {
            bail!("queue.max_batch_size must be greater than zero");
        }
        Ok(())
    }
}
