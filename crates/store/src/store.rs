//! The record store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use import_core::{
    Attempt, ImportedRecord, IngestionRun, InsertOutcome, ListQuery, NewRecord, Page, Result,
    RunId, RunStatus,
};

/// Result of an owner-scoped retry compare-and-set.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    /// The run was Failed and is now a fresh Running run.
    Rewound(IngestionRun),
    /// No run with that id belongs to the caller.
    NotFound,
    /// The run exists but is not Failed; nothing changed.
    NotRetriable(RunStatus),
}

/// Durable storage for runs and their records.
///
/// Every progress mutation is fenced by an [`Attempt`]: it applies only while
/// the run is Running and that attempt is still the current one, and reports
/// whether it applied. A terminal run is never resurrected and a superseded
/// body can no longer write.
/// Implementations must be safe for concurrent writes to different runs.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn create_run(&self, run: &IngestionRun) -> Result<()>;

    async fn get_run(&self, id: RunId) -> Result<Option<IngestionRun>>;

    /// Runs owned by `owner_id`, newest first.
    async fn list_runs(&self, owner_id: &str, query: &ListQuery) -> Result<Page<IngestionRun>>;

    async fn set_total(&self, attempt: Attempt, total: u64) -> Result<bool>;

    /// Adds `delta` to the processed counter, clamped to the total.
    async fn advance(&self, attempt: Attempt, delta: u64) -> Result<bool>;

    async fn mark_completed(&self, attempt: Attempt) -> Result<bool>;

    async fn mark_failed(&self, attempt: Attempt, message: &str) -> Result<bool>;

    /// Renews the liveness lease of a running attempt.
    async fn heartbeat(&self, attempt: Attempt) -> Result<bool>;

    /// Atomically rewinds a Failed run owned by `owner_id` to Running as a
    /// new attempt.
    ///
    /// Of two concurrent calls on the same Failed run exactly one observes
    /// `Rewound`; the other observes `NotRetriable(Running)`.
    async fn begin_retry(&self, id: RunId, owner_id: &str) -> Result<RetryOutcome>;

    /// Inserts records for `attempt`, skipping any whose
    /// `(run, name, category)` key already exists. The batch is applied
    /// atomically and fails with `Superseded` when the attempt is not live.
    async fn insert_records(&self, attempt: Attempt, records: &[NewRecord])
        -> Result<InsertOutcome>;

    /// Deletes every record of a run, returning how many were removed.
    async fn delete_records(&self, run_id: RunId) -> Result<u64>;

    /// Records of a run in source row order.
    async fn list_records(&self, run_id: RunId, query: &ListQuery)
        -> Result<Page<ImportedRecord>>;

    /// Fails Running runs whose last heartbeat is older than `stale_before`.
    async fn fail_stale_runs(&self, stale_before: DateTime<Utc>, message: &str) -> Result<u64>;

    async fn ping(&self) -> Result<()>;
}
