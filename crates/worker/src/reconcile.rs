//! Reclaiming orphaned runs.
//!
//! Run bodies live only in the process that scheduled them, and that process
//! renews each run's lease while it holds it. A Running run whose lease has
//! expired belongs to a process that exited and will never finish on its
//! own, so it is failed and becomes retriable. Runs with a live lease are
//! left alone even when another process executes them.

use std::time::Duration;

use chrono::Utc;
use import_core::Result;
use record_store::RecordStore;
use telemetry::metrics;
use tracing::{debug, warn};

/// Failure message recorded on reclaimed runs.
pub const ORPHANED_RUN_MESSAGE: &str = "import interrupted by service restart";

/// Fails every Running run whose lease is older than `lease_ttl`.
pub async fn reconcile_orphans(store: &dyn RecordStore, lease_ttl: Duration) -> Result<u64> {
    let Some(stale_before) = chrono::Duration::from_std(lease_ttl)
        .ok()
        .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
    else {
        return Ok(0);
    };

    let reclaimed = store
        .fail_stale_runs(stale_before, ORPHANED_RUN_MESSAGE)
        .await?;
    if reclaimed > 0 {
        metrics().runs_reclaimed.inc_by(reclaimed);
        metrics().runs_failed.inc_by(reclaimed);
        warn!(reclaimed, "Failed runs whose lease expired");
    } else {
        debug!("No orphaned runs found");
    }
    Ok(reclaimed)
}
