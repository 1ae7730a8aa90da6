//! Record store for import runs and imported catalog records.

pub mod config;
pub mod health;
pub mod memory;
pub mod postgres;
pub mod schema;
pub mod store;

use std::sync::Arc;

use import_core::Result;
use tracing::info;

pub use config::*;
pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use store::{RecordStore, RetryOutcome};

/// Shared handle to the configured store.
pub type SharedStore = Arc<dyn RecordStore>;

/// Builds the store selected by `config.backend`.
pub async fn connect(config: &StoreConfig) -> Result<SharedStore> {
    match config.backend {
        StoreBackend::Memory => {
            info!("Using in-memory record store; runs will not survive a restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => Ok(Arc::new(PgStore::connect(config).await?)),
    }
}
