//! Catalog records produced from accepted rows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::run::RunId;

/// A validated record that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRecord {
    pub run_id: RunId,
    /// Data-row position in the source, used for ordering
    pub source_row: u64,
    pub name: String,
    pub category: String,
    pub price: f64,
    pub stock: i64,
    pub description: Option<String>,
}

impl NewRecord {
    /// Identity used for duplicate suppression within a run.
    pub fn dedup_key(&self) -> RecordKey {
        RecordKey {
            run_id: self.run_id,
            name: self.name.clone(),
            category: self.category.clone(),
        }
    }
}

/// Uniqueness key of a record within its run.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub run_id: RunId,
    pub name: String,
    pub category: String,
}

/// A persisted catalog record owned by exactly one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedRecord {
    pub id: Uuid,
    pub run_id: RunId,
    pub source_row: u64,
    pub name: String,
    pub category: String,
    pub price: f64,
    pub stock: i64,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ImportedRecord {
    /// Assigns identity and timestamp to a validated record.
    pub fn from_new(record: NewRecord) -> Self {
        Self {
            id: Uuid::new_v4(),
            run_id: record.run_id,
            source_row: record.source_row,
            name: record.name,
            category: record.category,
            price: record.price,
            stock: record.stock,
            description: record.description,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of an insert-or-skip batch write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertOutcome {
    pub inserted: u64,
    /// Records dropped because their key already existed in the run
    pub skipped: u64,
}
