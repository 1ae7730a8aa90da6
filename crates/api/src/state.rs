//! Application state shared across handlers.

use std::sync::Arc;

use record_store::SharedStore;
use worker::RunManager;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Run lifecycle and owner-scoped queries
    pub manager: Arc<RunManager>,
}

impl AppState {
    pub fn new(manager: Arc<RunManager>) -> Self {
        Self { manager }
    }

    pub fn store(&self) -> &SharedStore {
        self.manager.store()
    }
}
