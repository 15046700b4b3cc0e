//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use graph_store::core::types::{EdgeRecord, EventRecord, Fields};
use graph_store::graph::{ChannelQueue, EventEmitter, EventQueue, GraphService};
use graph_store::storage::{GraphStorage, MemStore, PageCursors, SqliteStore, StorageError, StorageResult};
use graph_store::SchemaRegistry;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

pub const GRAPH: &str = include_str!("../fixtures/graph.json");

#[derive(Debug, Clone, Copy)]
pub enum Backend {
    Memory,
    Sqlite,
}

pub const BACKENDS: [Backend; 2] = [Backend::Memory, Backend::Sqlite];

pub struct Harness {
    pub service: Arc<GraphService>,
    pub events: flume::Receiver<Value>,
    _dir: Option<TempDir>,
}

pub fn registry() -> Arc<SchemaRegistry> {
    Arc::new(SchemaRegistry::from_json_str(GRAPH).unwrap())
}

async fn storage(backend: Backend) -> (Arc<dyn GraphStorage>, Option<TempDir>) {
    match backend {
        Backend::Memory => {
            let store: Arc<dyn GraphStorage> = Arc::new(MemStore::new());
            (store, None)
        }
        Backend::Sqlite => {
            let dir = tempfile::tempdir().unwrap();
            let store: Arc<dyn GraphStorage> = Arc::new(SqliteStore::open(dir.path().join("graph.db")).unwrap());
            (store, Some(dir))
        }
    }
}

/// Service with a channel queue whose receiver is exposed as `events`
pub async fn harness(backend: Backend) -> Harness {
    let (storage, dir) = storage(backend).await;
    let queue = Arc::new(ChannelQueue::new("graph-events", 0));
    let events = queue.subscribe();
    let service = GraphService::new(registry(), storage, EventEmitter::with_queue(queue));
    service.init().await.unwrap();
    service.check().await.unwrap();

    Harness {
        service: Arc::new(service),
        events,
        _dir: dir,
    }
}

/// Service over a [`FailingStorage`] wrapping the chosen backend
pub async fn failing_harness(backend: Backend) -> (Harness, Arc<FailingStorage>) {
    let (inner, dir) = storage(backend).await;
    let failing = Arc::new(FailingStorage::new(inner));
    let queue = Arc::new(ChannelQueue::new("graph-events", 0));
    let events = queue.subscribe();
    let service = GraphService::new(registry(), failing.clone(), EventEmitter::with_queue(queue));
    service.init().await.unwrap();

    let harness = Harness {
        service: Arc::new(service),
        events,
        _dir: dir,
    };
    (harness, failing)
}

/// Service publishing to an arbitrary queue
pub async fn harness_with_queue(backend: Backend, queue: Arc<dyn EventQueue>) -> Harness {
    let (storage, dir) = storage(backend).await;
    let service = GraphService::new(registry(), storage, EventEmitter::with_queue(queue));
    service.init().await.unwrap();

    Harness {
        service: Arc::new(service),
        events: flume::unbounded().1,
        _dir: dir,
    }
}

impl Harness {
    /// Events published so far, oldest first
    pub fn drain_events(&self) -> Vec<Value> {
        self.events.drain().collect()
    }

    pub async fn create_user(&self, email: &str) -> Fields {
        self.create_user_result(email).await.unwrap()
    }

    pub async fn create_user_result(&self, email: &str) -> graph_store::Result<Fields> {
        let input = fields(serde_json::json!({
            "object_type": "user",
            "email": email,
            "name": "Test User",
        }));
        self.service.create_object(input, Some("tester")).await
    }
}

pub fn fields(value: Value) -> Fields {
    match value {
        Value::Object(map) => map,
        other => panic!("expected object, got {}", other),
    }
}

pub fn id_of(doc: &Fields) -> String {
    doc["id"].as_str().unwrap().to_string()
}

/// Backend wrapper whose object writes and key releases can be switched to fail
pub struct FailingStorage {
    inner: Arc<dyn GraphStorage>,
    pub fail_writes: AtomicBool,
    pub fail_release: AtomicBool,
}

impl FailingStorage {
    pub fn new(inner: Arc<dyn GraphStorage>) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
            fail_release: AtomicBool::new(false),
        }
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_release(&self, fail: bool) {
        self.fail_release.store(fail, Ordering::SeqCst);
    }

    fn write_failure(&self, what: &str) -> StorageResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Task(format!("{} rejected", what)));
        }
        Ok(())
    }
}

#[async_trait]
impl GraphStorage for FailingStorage {
    async fn init(&self) -> StorageResult<()> {
        self.inner.init().await
    }

    async fn check_db(&self) -> StorageResult<()> {
        self.inner.check_db().await
    }

    async fn get_object(&self, id: &str) -> StorageResult<Option<Fields>> {
        self.inner.get_object(id).await
    }

    async fn create_object(&self, doc: &Fields) -> StorageResult<()> {
        self.write_failure("create_object")?;
        self.inner.create_object(doc).await
    }

    async fn update_object(&self, id: &str, delta: &Fields, delete_fields: &[String]) -> StorageResult<()> {
        self.write_failure("update_object")?;
        self.inner.update_object(id, delta, delete_fields).await
    }

    async fn delete_object(&self, id: &str) -> StorageResult<()> {
        self.inner.delete_object(id).await
    }

    async fn get_edge(&self, src: &str, name: &str, dst: &str) -> StorageResult<Option<EdgeRecord>> {
        self.inner.get_edge(src, name, dst).await
    }

    async fn create_edge(&self, edge: &EdgeRecord) -> StorageResult<()> {
        self.inner.create_edge(edge).await
    }

    async fn delete_edge(&self, src: &str, name: &str, dst: &str) -> StorageResult<()> {
        self.inner.delete_edge(src, name, dst).await
    }

    async fn get_edges(&self, src: &str, name: &str, count: usize, after: Option<&str>) -> StorageResult<Vec<String>> {
        self.inner.get_edges(src, name, count, after).await
    }

    async fn get_edge_count(&self, src: &str, name: &str) -> StorageResult<u64> {
        self.inner.get_edge_count(src, name).await
    }

    fn first_and_last_params(&self, page: &[String], after: Option<&str>) -> PageCursors {
        self.inner.first_and_last_params(page, after)
    }

    async fn save_event(&self, event: &EventRecord) -> StorageResult<()> {
        self.inner.save_event(event).await
    }

    async fn get_event(&self, id: &str) -> StorageResult<Option<EventRecord>> {
        self.inner.get_event(id).await
    }

    async fn add_unique(&self, key: &str) -> StorageResult<()> {
        self.inner.add_unique(key).await
    }

    async fn remove_unique(&self, key: &str) -> StorageResult<()> {
        if self.fail_release.load(Ordering::SeqCst) {
            return Err(StorageError::Task(format!("remove_unique '{}' rejected", key)));
        }
        self.inner.remove_unique(key).await
    }
}
