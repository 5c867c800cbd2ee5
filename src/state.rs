//! Shared state handed to every handler.

use crate::{config::AppConfig, services::storage_service::StorageService};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct AppState {
    pub storage: StorageService,
    pub config: Arc<AppConfig>,
}

impl AppState {
    /// Build the storage service described by `config`.
    pub fn from_config(config: AppConfig) -> Self {
        let storage = StorageService::new(config.data_root.clone())
            .with_min_free_bytes(config.min_free_bytes())
            .with_max_file_bytes(config.max_file_bytes);
        Self::new(storage, config)
    }

    pub fn new(storage: StorageService, config: AppConfig) -> Self {
        Self {
            storage,
            config: Arc::new(config),
        }
    }
}
