//! Background execution of import runs.
//!
//! - Run manager (start, retry, owner-scoped queries)
//! - Pipeline (fetch, parse, batched validate-and-insert)
//! - Progress tracking and startup reconciliation
//! - Maintenance (store health check, orphan sweep, metrics log)

pub mod batch;
pub mod config;
pub mod fetch;
pub mod manager;
pub mod pipeline;
pub mod progress;
pub mod reconcile;
pub mod scheduler;

pub use batch::{BatchReport, BatchWriter, Pacer};
pub use config::PipelineConfig;
pub use fetch::{HttpFetcher, SourceFetcher};
pub use manager::RunManager;
pub use pipeline::{Pipeline, RunSummary};
pub use progress::ProgressTracker;
pub use reconcile::{reconcile_orphans, ORPHANED_RUN_MESSAGE};
pub use scheduler::{MaintenanceConfig, MaintenanceScheduler};
