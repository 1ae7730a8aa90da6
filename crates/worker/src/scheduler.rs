//! Periodic maintenance tasks.

use std::sync::Arc;
use std::time::Duration;

use import_core::limits::DEFAULT_LEASE_TTL_SECS;
use record_store::{health::check_connection, SharedStore};
use telemetry::{health, metrics};
use tokio::time::interval;
use tracing::{error, info};

use crate::reconcile::reconcile_orphans;

/// Maintenance scheduler configuration.
#[derive(Debug, Clone)]
pub struct MaintenanceConfig {
    /// Store connectivity check interval
    pub health_check_interval: Duration,
    /// Metrics summary log interval
    pub metrics_log_interval: Duration,
    /// Orphan sweep interval
    pub orphan_sweep_interval: Duration,
    /// Lease age after which a Running run is reclaimed
    pub lease_ttl: Duration,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            health_check_interval: Duration::from_secs(30),
            metrics_log_interval: Duration::from_secs(60),
            orphan_sweep_interval: Duration::from_secs(60),
            lease_ttl: Duration::from_secs(DEFAULT_LEASE_TTL_SECS),
        }
    }
}

/// Runs the store health check, the orphan sweep and the periodic metrics log.
pub struct MaintenanceScheduler {
    config: MaintenanceConfig,
    store: SharedStore,
}

impl MaintenanceScheduler {
    pub fn new(config: MaintenanceConfig, store: SharedStore) -> Self {
        Self { config, store }
    }

    /// Starts all maintenance tasks.
    pub fn start(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        let mut handles = Vec::new();

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run_health_checks().await;
        }));

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run_orphan_sweeps().await;
        }));

        let scheduler = self.clone();
        handles.push(tokio::spawn(async move {
            scheduler.run_metrics_log().await;
        }));

        info!("Maintenance tasks started");
        handles
    }

    async fn run_health_checks(&self) {
        let mut ticker = interval(self.config.health_check_interval);

        loop {
            ticker.tick().await;
            self.check_store().await;
        }
    }

    /// Checks the store once and updates the health registry.
    pub async fn check_store(&self) -> bool {
        let healthy = check_connection(self.store.as_ref()).await;
        if healthy {
            health().store.set_healthy();
        } else {
            health().store.set_unhealthy("record store unreachable");
        }
        healthy
    }

    async fn run_orphan_sweeps(&self) {
        let mut ticker = interval(self.config.orphan_sweep_interval);
        // The first tick is immediate; startup reconciliation already ran.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            if let Err(e) = reconcile_orphans(self.store.as_ref(), self.config.lease_ttl).await {
                error!(error = %e, "Orphan sweep failed");
            }
        }
    }

    async fn run_metrics_log(&self) {
        let mut ticker = interval(self.config.metrics_log_interval);

        loop {
            ticker.tick().await;

            let snapshot = metrics().snapshot();
            info!(
                runs_started = snapshot.runs_started,
                runs_completed = snapshot.runs_completed,
                runs_failed = snapshot.runs_failed,
                runs_retried = snapshot.runs_retried,
                rows_parsed = snapshot.rows_parsed,
                rows_rejected = snapshot.rows_rejected,
                records_written = snapshot.records_written,
                duplicates_skipped = snapshot.duplicates_skipped,
                batch_write_errors = snapshot.batch_write_errors,
                fetch_latency_mean_ms = snapshot.fetch_latency_mean_ms,
                batch_write_latency_mean_ms = snapshot.batch_write_latency_mean_ms,
                active_runs = snapshot.active_runs,
                queued_runs = snapshot.queued_runs,
                "Pipeline metrics"
            );
        }
    }
}
