//! Batch validation and persistence.

use std::sync::Arc;
use std::time::{Duration, Instant};

use import_core::{transform_batch, Attempt, Error, InsertOutcome, RawRow, Result};
use record_store::SharedStore;
use telemetry::metrics;
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::debug;

/// Paces batch writes.
///
/// Holds the pause between consecutive batches of one run and a global
/// permit pool bounding how many batch writes are in flight across runs.
pub struct Pacer {
    delay: Duration,
    writes: Semaphore,
}

impl Pacer {
    pub fn new(delay: Duration, max_concurrent_writes: usize) -> Self {
        Self {
            delay,
            writes: Semaphore::new(max_concurrent_writes.max(1)),
        }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Waits the configured inter-batch delay.
    pub async fn pause(&self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }

    async fn acquire(&self) -> Result<SemaphorePermit<'_>> {
        self.writes
            .acquire()
            .await
            .map_err(|_| Error::internal("write permits closed"))
    }
}

/// What happened to one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Rows in the batch, valid or not
    pub rows: usize,
    pub rejected: usize,
    pub inserted: u64,
    pub skipped: u64,
}

/// Validates, transforms, and inserts one batch of rows.
pub struct BatchWriter {
    store: SharedStore,
    pacer: Arc<Pacer>,
}

impl BatchWriter {
    pub fn new(store: SharedStore, pacer: Arc<Pacer>) -> Self {
        Self { store, pacer }
    }

    /// Writes the valid rows of `rows` for `attempt`.
    ///
    /// Invalid rows are dropped without failing the batch. An empty set of
    /// valid rows issues no write.
    pub async fn write(&self, attempt: Attempt, rows: &[RawRow]) -> Result<BatchReport> {
        let (records, rejected) = transform_batch(attempt.run_id, rows);

        for (row, reason) in &rejected {
            debug!(run_id = %attempt.run_id, row, reason = %reason, "Row rejected");
        }
        metrics().rows_rejected.inc_by(rejected.len() as u64);

        let mut report = BatchReport {
            rows: rows.len(),
            rejected: rejected.len(),
            ..Default::default()
        };
        if records.is_empty() {
            return Ok(report);
        }

        let _permit = self.pacer.acquire().await?;
        let start = Instant::now();
        let outcome = match self.store.insert_records(attempt, &records).await {
            Ok(outcome) => outcome,
            Err(e @ Error::Superseded(_)) => return Err(e),
            Err(e) => {
                metrics().batch_write_errors.inc();
                return Err(e);
            }
        };

        let InsertOutcome { inserted, skipped } = outcome;
        metrics()
            .batch_write_latency_ms
            .observe(start.elapsed().as_millis() as u64);
        metrics().batches_written.inc();
        metrics().records_written.inc_by(inserted);
        metrics().duplicates_skipped.inc_by(skipped);

        report.inserted = inserted;
        report.skipped = skipped;
        Ok(report)
    }
}
