use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub cycle_interval_secs: Option<u64>,

    // Feature configs
    pub queue: Option<IndexQueueConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct IndexQueueConfig {
    pub enabled: Option<bool>,
    pub jobs_per_cycle: Option<usize>,
    pub max_retries: Option<u32>,
    pub max_batch_size: Option<usize>,
    pub stale_lock_threshold_secs: Option<u64>,
    pub archive_retention_days: Option<u64>,
    pub run_log_retention_days: Option<u64>,
    pub archive_completed: Option<bool>,
    pub verbose_failure_archive: Option<bool>,
    pub capture_debug_traces: Option<bool>,
    pub index_prefix: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
