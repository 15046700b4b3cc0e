//! Object and edge service
//!
//! [`GraphService`] composes the schema registry, a storage backend, the unique
//! constraint coordinator and the event emitter. Every mutation follows the
//! same sequence: validate, reserve unique keys, write, persist the event,
//! publish the event. Operations live in [`objects`] and [`edges`].

pub mod edges;
pub mod events;
pub mod objects;
pub mod pagination;
pub mod unique;

pub use events::{create_queue, ChannelQueue, EventEmitter, EventQueue, QueueError};
pub use objects::Fetched;
pub use pagination::Page;

use crate::core::error::{GraphError, Result};
use crate::core::types::{EventRecord, MicrosClock};
use crate::schema::SchemaRegistry;
use crate::storage::factory::SharedStorage;
use crate::system::Metrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// Response of an edge creation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Created {
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Response of an object or edge deletion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Deleted {
    /// Deletion time
    pub deleted_at: DateTime<Utc>,
}

/// Object and edge operations over one storage backend
pub struct GraphService {
    registry: Arc<SchemaRegistry>,
    storage: SharedStorage,
    emitter: EventEmitter,
    sort_clock: MicrosClock,
}

impl GraphService {
    /// Assemble a service
    pub fn new(registry: Arc<SchemaRegistry>, storage: SharedStorage, emitter: EventEmitter) -> Self {
        Self {
            registry,
            storage,
            emitter,
            sort_clock: MicrosClock::new(),
        }
    }

    /// Loaded schema registry
    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    /// Storage backend
    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }

    /// Bootstrap storage and queue; idempotent
    pub async fn init(&self) -> Result<()> {
        self.storage.init().await?;
        self.emitter
            .init()
            .await
            .map_err(|e| GraphError::config(format!("Queue initialisation failed: {}", e)))?;
        Ok(())
    }

    /// Verify the storage schema exists
    pub async fn check(&self) -> Result<()> {
        self.storage.check_db().await?;
        Ok(())
    }

    /// Persist an event, then publish it.
    ///
    /// A publish failure is returned after the event is durable; the mutation
    /// it describes stays committed.
    async fn emit(&self, event: EventRecord) -> Result<()> {
        let metrics = Metrics::global();

        self.storage.save_event(&event).await?;
        metrics.events.persisted.inc();

        if let Err(source) = self.emitter.send_event(&event).await {
            metrics.events.publish_failures.inc();
            tracing::error!(event_id = %event.id, error = %source, "Event persisted but not published");
            return Err(GraphError::Publish {
                event_id: event.id,
                source,
            });
        }
        if self.emitter.has_queue() {
            metrics.events.published.inc();
        }
        Ok(())
    }
}
