//! Pipeline configuration.

use std::path::PathBuf;
use std::time::Duration;

use import_core::limits::{
    DEFAULT_BATCH_DELAY_MS, DEFAULT_BATCH_SIZE, DEFAULT_FETCH_TIMEOUT_SECS,
    DEFAULT_HEARTBEAT_INTERVAL_SECS, DEFAULT_LEASE_TTL_SECS, DEFAULT_MAX_CONCURRENT_RUNS,
    DEFAULT_MAX_CONCURRENT_WRITES, MAX_SOURCE_BYTES,
};
use serde::{Deserialize, Serialize};

/// Settings for run execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Rows per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between batches of one run; 0 disables pacing
    #[serde(default = "default_batch_delay_ms")]
    pub batch_delay_ms: u64,
    /// Bound on fetching the source file
    #[serde(default = "default_fetch_timeout_secs")]
    pub fetch_timeout_secs: u64,
    /// Largest accepted source payload
    #[serde(default = "default_max_source_bytes")]
    pub max_source_bytes: usize,
    /// Directory local sources must live under; unset rejects local paths
    #[serde(default)]
    pub local_root: Option<PathBuf>,
    /// Runs executing at once
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    /// Batch writes in flight across all runs
    #[serde(default = "default_max_concurrent_writes")]
    pub max_concurrent_writes: usize,
    /// Lease renewal period for scheduled runs
    #[serde(default = "default_heartbeat_interval_secs")]
    pub heartbeat_interval_secs: u64,
    /// Age after which a Running run's lease counts as expired
    #[serde(default = "default_lease_ttl_secs")]
    pub lease_ttl_secs: u64,
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_batch_delay_ms() -> u64 {
    DEFAULT_BATCH_DELAY_MS
}

fn default_fetch_timeout_secs() -> u64 {
    DEFAULT_FETCH_TIMEOUT_SECS
}

fn default_max_source_bytes() -> usize {
    MAX_SOURCE_BYTES
}

fn default_max_concurrent_runs() -> usize {
    DEFAULT_MAX_CONCURRENT_RUNS
}

fn default_max_concurrent_writes() -> usize {
    DEFAULT_MAX_CONCURRENT_WRITES
}

fn default_heartbeat_interval_secs() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_SECS
}

fn default_lease_ttl_secs() -> u64 {
    DEFAULT_LEASE_TTL_SECS
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_delay_ms: default_batch_delay_ms(),
            fetch_timeout_secs: default_fetch_timeout_secs(),
            max_source_bytes: default_max_source_bytes(),
            local_root: None,
            max_concurrent_runs: default_max_concurrent_runs(),
            max_concurrent_writes: default_max_concurrent_writes(),
            heartbeat_interval_secs: default_heartbeat_interval_secs(),
            lease_ttl_secs: default_lease_ttl_secs(),
        }
    }
}

impl PipelineConfig {
    /// Batch size, never zero.
    pub fn batch_size(&self) -> usize {
        self.batch_size.max(1)
    }

    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn max_concurrent_runs(&self) -> usize {
        self.max_concurrent_runs.max(1)
    }

    pub fn max_concurrent_writes(&self) -> usize {
        self.max_concurrent_writes.max(1)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    /// Lease TTL, at least two heartbeat intervals.
    pub fn lease_ttl(&self) -> Duration {
        let floor = self.heartbeat_interval().as_secs().saturating_mul(2);
        Duration::from_secs(self.lease_ttl_secs.max(floor))
    }
}
