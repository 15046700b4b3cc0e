//! Storage and persistence layer
//!
//! Every backend implements [`GraphStorage`] with identical observable
//! behaviour; the service layer never knows which one it is talking to.
//! Only the pagination cursors differ, and those are opaque to callers.

pub mod factory;
pub mod mem_store;
pub mod sqlite_store;

pub use factory::create_storage;
pub use mem_store::MemStore;
pub use sqlite_store::SqliteStore;

use crate::core::types::{EdgeRecord, EventRecord, Fields};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Result type for storage operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Storage layer errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Primary key already present
    #[error("Record '{0}' already exists")]
    AlreadyExists(String),

    /// Unique key held by another object
    #[error("Unique key '{0}' is already reserved")]
    AlreadyReserved(String),

    /// Backend was never initialised
    #[error("Storage schema missing: {0}")]
    SchemaMissing(String),

    /// Stored data could not be interpreted
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// SQLite driver errors
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON encoding of stored documents
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Blocking task failed to complete
    #[error("Storage task failed: {0}")]
    Task(String),
}

/// Cursors describing one page of an edge listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PageCursors {
    /// Resumes right after the page's first element
    pub first: Option<String>,
    /// Resumes right after the page's last element
    pub last: Option<String>,
}

/// Storage interface shared by all backends
///
/// Objects are flat documents (see [`crate::core::types::ObjectRecord::to_document`]).
/// Writes are unconditional; concurrency policy belongs to the service layer.
#[async_trait]
pub trait GraphStorage: Send + Sync {
    /// Create tables/indexes; safe to call repeatedly
    async fn init(&self) -> StorageResult<()>;

    /// Fail with [`StorageError::SchemaMissing`] when `init` never ran
    async fn check_db(&self) -> StorageResult<()>;

    /// Fetch an object document
    async fn get_object(&self, id: &str) -> StorageResult<Option<Fields>>;

    /// Insert an object document; fails on a duplicate id
    async fn create_object(&self, doc: &Fields) -> StorageResult<()>;

    /// Shallow-merge `delta` into the stored document and drop `delete_fields`
    async fn update_object(&self, id: &str, delta: &Fields, delete_fields: &[String]) -> StorageResult<()>;

    /// Remove an object document
    async fn delete_object(&self, id: &str) -> StorageResult<()>;

    /// Fetch one edge
    async fn get_edge(&self, src: &str, name: &str, dst: &str) -> StorageResult<Option<EdgeRecord>>;

    /// Insert an edge; fails on a duplicate triple
    async fn create_edge(&self, edge: &EdgeRecord) -> StorageResult<()>;

    /// Remove an edge
    async fn delete_edge(&self, src: &str, name: &str, dst: &str) -> StorageResult<()>;

    /// Destination ids, newest first, at most `count`, strictly after the `after` cursor
    async fn get_edges(&self, src: &str, name: &str, count: usize, after: Option<&str>) -> StorageResult<Vec<String>>;

    /// Number of edges with this source and name
    async fn get_edge_count(&self, src: &str, name: &str) -> StorageResult<u64>;

    /// Cursors for a page returned by [`GraphStorage::get_edges`]
    fn first_and_last_params(&self, page: &[String], after: Option<&str>) -> PageCursors;

    /// Append an event to the durable log
    async fn save_event(&self, event: &EventRecord) -> StorageResult<()>;

    /// Fetch a persisted event
    async fn get_event(&self, id: &str) -> StorageResult<Option<EventRecord>>;

    /// Reserve a unique key; fails with [`StorageError::AlreadyReserved`] when held
    async fn add_unique(&self, key: &str) -> StorageResult<()>;

    /// Release a unique key; no-op when absent
    async fn remove_unique(&self, key: &str) -> StorageResult<()>;
}

/// Shallow merge used by every backend's `update_object`
pub(crate) fn merge_document(doc: &mut Fields, delta: &Fields, delete_fields: &[String]) {
    for (key, value) in delta {
        doc.insert(key.clone(), value.clone());
    }
    for key in delete_fields {
        doc.remove(key);
    }
}
