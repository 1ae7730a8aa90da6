//! Run progress bookkeeping.
//!
//! Thin layer over the store that logs and counts every lifecycle change.
//! Updates that do not apply (the run already left Running, or a retry
//! started a newer attempt) are logged and reported as `false`, so a late
//! write can never revive a terminal run or interleave with another body.

use import_core::{Attempt, Result};
use record_store::SharedStore;
use telemetry::metrics;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct ProgressTracker {
    store: SharedStore,
}

impl ProgressTracker {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn set_total(&self, attempt: Attempt, total: u64) -> Result<bool> {
        let applied = self.store.set_total(attempt, total).await?;
        if applied {
            debug!(run_id = %attempt.run_id, total, "Run total recorded");
        } else {
            warn!(attempt = %attempt, "Ignoring total for attempt that is no longer active");
        }
        Ok(applied)
    }

    /// Adds `delta` processed rows.
    pub async fn advance(&self, attempt: Attempt, delta: u64) -> Result<bool> {
        let applied = self.store.advance(attempt, delta).await?;
        if !applied {
            warn!(attempt = %attempt, delta, "Ignoring progress for attempt that is no longer active");
        }
        Ok(applied)
    }

    pub async fn mark_completed(&self, attempt: Attempt) -> Result<bool> {
        let applied = self.store.mark_completed(attempt).await?;
        if applied {
            metrics().runs_completed.inc();
            info!(run_id = %attempt.run_id, attempt = attempt.number, "Import run completed");
        }
        Ok(applied)
    }

    pub async fn mark_failed(&self, attempt: Attempt, message: &str) -> Result<bool> {
        let applied = self.store.mark_failed(attempt, message).await?;
        if applied {
            metrics().runs_failed.inc();
            warn!(run_id = %attempt.run_id, attempt = attempt.number, error = %message, "Import run failed");
        }
        Ok(applied)
    }

    /// Renews the attempt's lease.
    pub async fn heartbeat(&self, attempt: Attempt) -> Result<bool> {
        let renewed = self.store.heartbeat(attempt).await?;
        if !renewed {
            debug!(attempt = %attempt, "Lease not renewed; attempt is no longer active");
        }
        Ok(renewed)
    }
}
