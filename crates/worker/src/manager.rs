//! Import run management.
//!
//! `RunManager` is the only entry point for starting and retrying runs. A
//! run is persisted before its body is scheduled, so it is visible to
//! queries before any I/O happens. Bodies run detached on the runtime and
//! are isolated from panics: a body that panics is failed like any other
//! error. While a run is queued or executing, its lease is renewed on a
//! fixed interval so other processes' orphan sweeps leave it alone.

use std::sync::Arc;
use std::time::Duration;

use import_core::limits::{MAX_FILE_NAME_LEN, MAX_SOURCE_URL_LEN};
use import_core::{Error, ImportedRecord, IngestionRun, ListQuery, Page, Result, RunId};
use record_store::{RetryOutcome, SharedStore};
use telemetry::metrics;
use tokio::sync::Semaphore;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, info_span, warn, Instrument};

use crate::config::PipelineConfig;
use crate::fetch::SourceFetcher;
use crate::pipeline::Pipeline;
use crate::reconcile;

pub struct RunManager {
    store: SharedStore,
    pipeline: Arc<Pipeline>,
    slots: Arc<Semaphore>,
    heartbeat_interval: Duration,
    lease_ttl: Duration,
}

impl RunManager {
    pub fn new(
        store: SharedStore,
        fetcher: Arc<dyn SourceFetcher>,
        config: PipelineConfig,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(config.max_concurrent_runs()));
        let heartbeat_interval = config.heartbeat_interval();
        let lease_ttl = config.lease_ttl();
        Self {
            pipeline: Arc::new(Pipeline::new(store.clone(), fetcher, config)),
            store,
            slots,
            heartbeat_interval,
            lease_ttl,
        }
    }

    pub fn store(&self) -> &SharedStore {
        &self.store
    }

    /// Creates a Running run and schedules its body.
    ///
    /// Returns as soon as the run is persisted; the body's outcome is only
    /// observable through the run's status.
    pub async fn start(
        &self,
        owner_id: &str,
        file_name: &str,
        source_url: &str,
    ) -> Result<IngestionRun> {
        let owner_id = required("ownerId", owner_id, usize::MAX)?;
        let file_name = required("fileName", file_name, MAX_FILE_NAME_LEN)?;
        let source_url = required("sourceUrl", source_url, MAX_SOURCE_URL_LEN)?;

        let run = IngestionRun::new(owner_id, file_name, source_url);
        self.store.create_run(&run).await?;
        metrics().runs_started.inc();
        info!(run_id = %run.id, owner_id = %run.owner_id, file_name = %run.file_name, "Import run started");

        self.schedule(run.clone());
        Ok(run)
    }

    /// Re-executes a Failed run from scratch.
    ///
    /// The Failed -> Running transition is a compare-and-set in the store
    /// that also starts a new attempt, so of concurrent retries on one run
    /// exactly one succeeds. Records of the previous attempt are deleted
    /// before the body is scheduled.
    pub async fn retry(&self, run_id: RunId, owner_id: &str) -> Result<IngestionRun> {
        let run = match self.store.begin_retry(run_id, owner_id).await? {
            RetryOutcome::Rewound(run) => run,
            RetryOutcome::NotFound => return Err(Error::NotFoundOrForbidden(run_id)),
            RetryOutcome::NotRetriable(status) => {
                return Err(Error::InvalidState { id: run_id, status })
            }
        };

        if let Err(e) = self.store.delete_records(run_id).await {
            self.pipeline
                .fail(
                    run.current_attempt(),
                    &format!("could not clear previous records: {}", e),
                )
                .await;
            return Err(e);
        }

        metrics().runs_retried.inc();
        info!(run_id = %run_id, attempt = run.attempt, "Import run retried");

        self.schedule(run.clone());
        Ok(run)
    }

    /// Returns a run owned by `owner_id`.
    ///
    /// Missing runs and runs of other owners are indistinguishable.
    pub async fn get_run(&self, run_id: RunId, owner_id: &str) -> Result<IngestionRun> {
        self.store
            .get_run(run_id)
            .await?
            .filter(|run| run.is_owned_by(owner_id))
            .ok_or(Error::NotFoundOrForbidden(run_id))
    }

    pub async fn list_runs(&self, owner_id: &str, query: &ListQuery) -> Result<Page<IngestionRun>> {
        self.store.list_runs(owner_id, query).await
    }

    /// Lists records of a run after checking the caller owns it.
    pub async fn list_records(
        &self,
        run_id: RunId,
        owner_id: &str,
        query: &ListQuery,
    ) -> Result<Page<ImportedRecord>> {
        self.get_run(run_id, owner_id).await?;
        self.store.list_records(run_id, query).await
    }

    /// Fails Running runs whose lease expired.
    pub async fn reconcile_orphans(&self) -> Result<u64> {
        reconcile::reconcile_orphans(self.store.as_ref(), self.lease_ttl).await
    }

    /// Runs waiting for or holding an execution slot.
    pub fn in_flight(&self) -> u64 {
        metrics().active_runs.get() + metrics().queued_runs.get()
    }

    fn schedule(&self, run: IngestionRun) {
        let pipeline = self.pipeline.clone();
        let slots = self.slots.clone();
        let heartbeat_interval = self.heartbeat_interval;
        let attempt = run.current_attempt();
        let span = info_span!(
            "import_run",
            run_id = %run.id,
            attempt = run.attempt,
            owner_id = %run.owner_id
        );

        metrics().queued_runs.inc();
        tokio::spawn(
            async move {
                let execution = execute(pipeline.clone(), slots, run);
                tokio::pin!(execution);

                let mut ticker = interval(heartbeat_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;

                loop {
                    tokio::select! {
                        _ = &mut execution => break,
                        _ = ticker.tick() => {
                            if let Err(e) = pipeline.tracker().heartbeat(attempt).await {
                                warn!(error = %e, "Could not renew run lease");
                            }
                        }
                    }
                }
            }
            .instrument(span),
        );
    }
}

/// Waits for a run slot, then executes the body in its own task.
async fn execute(pipeline: Arc<Pipeline>, slots: Arc<Semaphore>, run: IngestionRun) {
    let attempt = run.current_attempt();
    let permit = slots.acquire_owned().await;
    metrics().queued_runs.dec();
    let Ok(_permit) = permit else {
        pipeline.fail(attempt, "run scheduler is shut down").await;
        return;
    };

    metrics().active_runs.inc();
    let body = {
        let pipeline = pipeline.clone();
        tokio::spawn(async move { pipeline.run(&run).await }.in_current_span())
    };
    if let Err(e) = body.await {
        error!(run_id = %attempt.run_id, error = %e, "Import run body aborted");
        pipeline
            .fail(attempt, "import aborted by an internal error")
            .await;
    }
    metrics().active_runs.dec();
}

fn required<'a>(field: &str, value: &'a str, max_len: usize) -> Result<&'a str> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::validation(format!("{} is required", field)));
    }
    if value.len() > max_len {
        return Err(Error::validation(format!(
            "{} exceeds {} characters",
            field, max_len
        )));
    }
    Ok(value)
}
