//! Application state shared across handlers.

use depot_core::config::AppConfig;
use depot_index::FileIndex;
use depot_storage::ObjectGateway;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Object storage gateway.
    pub storage: Arc<dyn ObjectGateway>,
    /// Dedup index.
    pub index: Arc<FileIndex>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(config: AppConfig, storage: Arc<dyn ObjectGateway>) -> Self {
        let index = Arc::new(FileIndex::new(storage.clone()));
        Self {
            config: Arc::new(config),
            storage,
            index,
        }
    }
}
