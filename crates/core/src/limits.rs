//! Pipeline sizing defaults.
//!
//! These are the defaults for the configurable pipeline settings; the
//! worker's `PipelineConfig` starts from them.

// === Batching ===

/// Rows transformed and written per batch.
///
/// Bounds memory per write and sets the progress checkpoint granularity.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Pause between consecutive batches of one run (milliseconds).
pub const DEFAULT_BATCH_DELAY_MS: u64 = 100;

// === Fetching ===

/// Upper bound on fetching the source file (seconds).
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Largest accepted source payload (50MB).
///
/// Rows are fully materialized in memory, so the source size is capped.
pub const MAX_SOURCE_BYTES: usize = 50 * 1024 * 1024;

// === Liveness ===

/// How often an executing process renews the lease of each of its runs.
pub const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 10;

/// A Running run whose lease is older than this is considered orphaned.
pub const DEFAULT_LEASE_TTL_SECS: u64 = 60;

// === Concurrency ===

/// Runs executing at once; further runs wait for a slot.
pub const DEFAULT_MAX_CONCURRENT_RUNS: usize = 8;

/// Batch writes in flight across all runs.
pub const DEFAULT_MAX_CONCURRENT_WRITES: usize = 4;

// === Request fields ===

pub const MAX_FILE_NAME_LEN: usize = 255;

pub const MAX_SOURCE_URL_LEN: usize = 2048;
