//! The background body of one import run.
//!
//! fetch -> parse -> record total -> per batch: validate, insert, advance,
//! pace -> complete. Any error along the way fails the run with a
//! human-readable message; nothing escapes to the caller. A body whose
//! attempt was superseded stops at its next store write without touching
//! the run.

use std::sync::Arc;
use std::time::Instant;

use import_core::{parse_rows, Attempt, Error, IngestionRun, Result, SourceFormat};
use record_store::SharedStore;
use telemetry::metrics;
use tracing::{debug, error, info, warn};

use crate::batch::{BatchWriter, Pacer};
use crate::config::PipelineConfig;
use crate::fetch::SourceFetcher;
use crate::progress::ProgressTracker;

/// Totals for a successful run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub total_rows: u64,
    pub batches: u64,
    pub rejected: u64,
    pub inserted: u64,
    pub skipped: u64,
}

pub struct Pipeline {
    fetcher: Arc<dyn SourceFetcher>,
    tracker: ProgressTracker,
    writer: BatchWriter,
    pacer: Arc<Pacer>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(store: SharedStore, fetcher: Arc<dyn SourceFetcher>, config: PipelineConfig) -> Self {
        let pacer = Arc::new(Pacer::new(
            config.batch_delay(),
            config.max_concurrent_writes(),
        ));
        Self {
            fetcher,
            tracker: ProgressTracker::new(store.clone()),
            writer: BatchWriter::new(store, pacer.clone()),
            pacer,
            config,
        }
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    /// Executes the run and settles it in a terminal state.
    pub async fn run(&self, run: &IngestionRun) {
        let start = Instant::now();
        let attempt = run.current_attempt();
        match self.execute(run, attempt).await {
            Ok(summary) => {
                info!(
                    run_id = %run.id,
                    attempt = attempt.number,
                    total_rows = summary.total_rows,
                    batches = summary.batches,
                    inserted = summary.inserted,
                    skipped = summary.skipped,
                    rejected = summary.rejected,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Import run finished"
                );
            }
            Err(Error::Superseded(_)) => {
                warn!(attempt = %attempt, "Import attempt superseded; abandoning its work");
            }
            Err(e) => self.fail(attempt, &e.to_string()).await,
        }
        metrics()
            .run_duration_ms
            .observe(start.elapsed().as_millis() as u64);
    }

    /// Moves the run to Failed, logging if even that cannot be recorded.
    pub async fn fail(&self, attempt: Attempt, message: &str) {
        if let Err(e) = self.tracker.mark_failed(attempt, message).await {
            error!(run_id = %attempt.run_id, error = %e, "Could not record run failure");
        }
    }

    async fn execute(&self, run: &IngestionRun, attempt: Attempt) -> Result<RunSummary> {
        let bytes = self.fetch(&run.source_url).await?;

        let parse_start = Instant::now();
        let format = SourceFormat::from_file_name(&run.file_name);
        let rows = parse_rows(&bytes, format)?;
        drop(bytes);
        metrics()
            .parse_latency_ms
            .observe(parse_start.elapsed().as_millis() as u64);
        metrics().rows_parsed.inc_by(rows.len() as u64);

        let total = rows.len() as u64;
        live(attempt, self.tracker.set_total(attempt, total).await?)?;
        debug!(run_id = %run.id, total, ?format, "Source parsed");

        let mut summary = RunSummary {
            total_rows: total,
            ..Default::default()
        };

        for (index, chunk) in rows.chunks(self.config.batch_size()).enumerate() {
            if index > 0 {
                self.pacer.pause().await;
            }

            let report = self
                .writer
                .write(attempt, chunk)
                .await
                .map_err(|e| in_batch(index + 1, e))?;
            summary.batches += 1;
            summary.rejected += report.rejected as u64;
            summary.inserted += report.inserted;
            summary.skipped += report.skipped;

            live(attempt, self.tracker.advance(attempt, chunk.len() as u64).await?)?;
        }

        live(attempt, self.tracker.mark_completed(attempt).await?)?;
        Ok(summary)
    }

    async fn fetch(&self, locator: &str) -> Result<bytes::Bytes> {
        let start = Instant::now();
        let timeout = self.config.fetch_timeout();
        let bytes = tokio::time::timeout(timeout, self.fetcher.fetch(locator))
            .await
            .map_err(|_| Error::fetch(format!("timed out after {}s", timeout.as_secs())))??;
        metrics()
            .fetch_latency_ms
            .observe(start.elapsed().as_millis() as u64);
        Ok(bytes)
    }
}

/// Stops the body once a store write was refused for its attempt.
fn live(attempt: Attempt, applied: bool) -> Result<()> {
    if applied {
        Ok(())
    } else {
        Err(Error::Superseded(attempt))
    }
}

/// Tags a store error with the 1-based batch it occurred in.
fn in_batch(batch: usize, err: Error) -> Error {
    match err {
        Error::Database { code, message } => Error::Database {
            code,
            message: format!("batch {}: {}", batch, message),
        },
        other => other,
    }
}
