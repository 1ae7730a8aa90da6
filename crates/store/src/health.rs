//! Record store health checks.

use tracing::{debug, error};

use crate::store::RecordStore;

/// Check record store connection health.
pub async fn check_connection(store: &dyn RecordStore) -> bool {
    match store.ping().await {
        Ok(()) => {
            debug!("Record store connection healthy");
            true
        }
        Err(e) => {
            error!("Record store health check failed: {}", e);
            false
        }
    }
}
