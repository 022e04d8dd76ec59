//! Command implementations.

pub mod agents;
pub mod config;
pub mod migrate;
pub mod status;

use mnemos_store::config::load_config;
use mnemos_store::StorageAdapter;
use mnemos_types::error::StoreResult;
use std::path::Path;
use tracing::debug;

/// Load configuration and open (and migrate) the configured backend.
pub async fn open_adapter(config_path: Option<&Path>) -> StoreResult<StorageAdapter> {
    let config = load_config(config_path);
    debug!(backend = ?config.backend(), "Opening storage");
    StorageAdapter::init(config).await
}
