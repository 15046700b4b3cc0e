//! Storage factory for creating storage implementations based on configuration

use crate::core::config::{StorageConfig, StorageType};
use crate::storage::{GraphStorage, MemStore, SqliteStore, StorageResult};
use std::sync::Arc;

/// Storage handle shared by the service and the HTTP layer
pub type SharedStorage = Arc<dyn GraphStorage>;

/// Create a storage implementation based on configuration
pub fn create_storage(config: &StorageConfig) -> StorageResult<SharedStorage> {
    match config.storage_type {
        StorageType::Memory => {
            tracing::info!("Using in-memory storage");
            Ok(Arc::new(MemStore::new()))
        }
        StorageType::Sqlite => {
            let store = SqliteStore::open(&config.sqlite_path)?;
            Ok(Arc::new(store))
        }
    }
}
