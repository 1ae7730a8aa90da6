//! In-process record store.
//!
//! Holds all state behind one mutex, which makes every operation atomic.
//! Used for development and tests; contents do not survive a restart.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use import_core::{
    Attempt, Error, Filterable, ImportedRecord, IngestionRun, InsertOutcome, ListQuery, NewRecord,
    Page, RecordKey, Result, RunId, RunStatus,
};
use parking_lot::Mutex;

use crate::store::{RecordStore, RetryOutcome};

#[derive(Default)]
struct Inner {
    runs: HashMap<RunId, IngestionRun>,
    records: HashMap<RunId, Vec<ImportedRecord>>,
    keys: HashSet<RecordKey>,
}

/// Record store kept entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records currently stored for a run.
    pub fn record_count(&self, run_id: RunId) -> usize {
        self.inner
            .lock()
            .records
            .get(&run_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Applies `apply` only if `attempt` is the run's live execution.
    fn update_run<F>(&self, attempt: Attempt, apply: F) -> bool
    where
        F: FnOnce(&mut IngestionRun) -> bool,
    {
        self.inner
            .lock()
            .runs
            .get_mut(&attempt.run_id)
            .filter(|run| run.is_executing(attempt))
            .map(apply)
            .unwrap_or(false)
    }
}

fn filtered<T: Filterable + Clone>(
    items: impl Iterator<Item = T>,
    query: &ListQuery,
) -> Result<Vec<T>> {
    let filter = query.filter::<T>()?;
    Ok(items
        .filter(|item| filter.as_ref().map_or(true, |f| f.matches(item)))
        .collect())
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create_run(&self, run: &IngestionRun) -> Result<()> {
        self.inner.lock().runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn get_run(&self, id: RunId) -> Result<Option<IngestionRun>> {
        Ok(self.inner.lock().runs.get(&id).cloned())
    }

    async fn list_runs(&self, owner_id: &str, query: &ListQuery) -> Result<Page<IngestionRun>> {
        let owned: Vec<IngestionRun> = {
            let inner = self.inner.lock();
            inner
                .runs
                .values()
                .filter(|run| run.is_owned_by(owner_id))
                .cloned()
                .collect()
        };

        let mut runs = filtered(owned.into_iter(), query)?;
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        Ok(Page::from_vec(runs, query))
    }

    async fn set_total(&self, attempt: Attempt, total: u64) -> Result<bool> {
        Ok(self.update_run(attempt, |run| run.set_total(total)))
    }

    async fn advance(&self, attempt: Attempt, delta: u64) -> Result<bool> {
        Ok(self.update_run(attempt, |run| run.advance(delta)))
    }

    async fn mark_completed(&self, attempt: Attempt) -> Result<bool> {
        Ok(self.update_run(attempt, IngestionRun::mark_completed))
    }

    async fn mark_failed(&self, attempt: Attempt, message: &str) -> Result<bool> {
        Ok(self.update_run(attempt, |run| run.mark_failed(message)))
    }

    async fn heartbeat(&self, attempt: Attempt) -> Result<bool> {
        Ok(self.update_run(attempt, IngestionRun::touch))
    }

    async fn begin_retry(&self, id: RunId, owner_id: &str) -> Result<RetryOutcome> {
        let mut inner = self.inner.lock();
        let Some(run) = inner.runs.get_mut(&id).filter(|run| run.is_owned_by(owner_id)) else {
            return Ok(RetryOutcome::NotFound);
        };

        if run.rewind_for_retry() {
            Ok(RetryOutcome::Rewound(run.clone()))
        } else {
            Ok(RetryOutcome::NotRetriable(run.status))
        }
    }

    async fn insert_records(
        &self,
        attempt: Attempt,
        records: &[NewRecord],
    ) -> Result<InsertOutcome> {
        let mut inner = self.inner.lock();
        let live = inner
            .runs
            .get(&attempt.run_id)
            .is_some_and(|run| run.is_executing(attempt));
        if !live {
            return Err(Error::Superseded(attempt));
        }

        let mut outcome = InsertOutcome::default();

        for record in records {
            if !inner.keys.insert(record.dedup_key()) {
                outcome.skipped += 1;
                continue;
            }
            inner
                .records
                .entry(record.run_id)
                .or_default()
                .push(ImportedRecord::from_new(record.clone()));
            outcome.inserted += 1;
        }

        Ok(outcome)
    }

    async fn delete_records(&self, run_id: RunId) -> Result<u64> {
        let mut inner = self.inner.lock();
        inner.keys.retain(|key| key.run_id != run_id);
        Ok(inner
            .records
            .remove(&run_id)
            .map(|records| records.len() as u64)
            .unwrap_or(0))
    }

    async fn list_records(
        &self,
        run_id: RunId,
        query: &ListQuery,
    ) -> Result<Page<ImportedRecord>> {
        let stored = self
            .inner
            .lock()
            .records
            .get(&run_id)
            .cloned()
            .unwrap_or_default();

        let mut records = filtered(stored.into_iter(), query)?;
        records.sort_by_key(|record| record.source_row);
        Ok(Page::from_vec(records, query))
    }

    async fn fail_stale_runs(&self, stale_before: DateTime<Utc>, message: &str) -> Result<u64> {
        let mut inner = self.inner.lock();
        let mut failed = 0;
        for run in inner.runs.values_mut() {
            if run.status == RunStatus::Running
                && run.heartbeat_at < stale_before
                && run.mark_failed(message)
            {
                failed += 1;
            }
        }
        Ok(failed)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
