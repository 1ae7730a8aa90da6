//! Internal telemetry for the catalog import service.
//!
//! Structured logging via `tracing`, in-process pipeline metrics, and a
//! component health registry backing the readiness check.

pub mod health;
pub mod metrics;
pub mod tracing_setup;

pub use health::*;
pub use metrics::*;
pub use tracing_setup::*;
