//! In-memory storage backend
//!
//! Objects, events and unique keys live in `DashMap`s. Edges are grouped per
//! `(src, name)` list; each list keeps an ordered set of `(sort_value, dst)`
//! for scans and a map from destination to sort value for lookups. Edges that
//! share a sort value are ordered by destination id.
//! Cursors are destination ids: a listing resumes strictly below the cursor
//! edge's `(sort_value, dst)` position.

use crate::core::types::{EdgeRecord, EventRecord, Fields};
use crate::storage::{merge_document, GraphStorage, PageCursors, StorageError, StorageResult};
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

/// Edges of one `(src, name)` pair
#[derive(Debug, Default)]
struct EdgeList {
    by_sort: BTreeSet<(String, String)>,
    by_dst: HashMap<String, String>,
}

/// In-memory backend; data is lost on exit
#[derive(Debug, Default)]
pub struct MemStore {
    initialized: AtomicBool,
    objects: DashMap<String, Fields>,
    edges: DashMap<(String, String), EdgeList>,
    events: DashMap<String, EventRecord>,
    unique_keys: DashSet<String>,
}

impl MemStore {
    /// Create an empty, uninitialised store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    /// Number of persisted events
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    fn list_key(src: &str, name: &str) -> (String, String) {
        (src.to_string(), name.to_string())
    }
}

#[async_trait]
impl GraphStorage for MemStore {
    async fn init(&self) -> StorageResult<()> {
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    async fn check_db(&self) -> StorageResult<()> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StorageError::SchemaMissing("memory store not initialised".to_string()))
        }
    }

    async fn get_object(&self, id: &str) -> StorageResult<Option<Fields>> {
        Ok(self.objects.get(id).map(|doc| doc.value().clone()))
    }

    async fn create_object(&self, doc: &Fields) -> StorageResult<()> {
        let id = doc
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| StorageError::Corrupt("object document without id".to_string()))?;

        match self.objects.entry(id.to_string()) {
            Entry::Occupied(_) => Err(StorageError::AlreadyExists(id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(doc.clone());
                Ok(())
            }
        }
    }

    async fn update_object(&self, id: &str, delta: &Fields, delete_fields: &[String]) -> StorageResult<()> {
        if let Some(mut doc) = self.objects.get_mut(id) {
            merge_document(doc.value_mut(), delta, delete_fields);
        }
        Ok(())
    }

    async fn delete_object(&self, id: &str) -> StorageResult<()> {
        self.objects.remove(id);
        Ok(())
    }

    async fn get_edge(&self, src: &str, name: &str, dst: &str) -> StorageResult<Option<EdgeRecord>> {
        let edge = self.edges.get(&Self::list_key(src, name)).and_then(|list| {
            list.by_dst.get(dst).map(|sort_value| EdgeRecord {
                src: src.to_string(),
                edge_name: name.to_string(),
                dst: dst.to_string(),
                sort_value: sort_value.clone(),
            })
        });
        Ok(edge)
    }

    async fn create_edge(&self, edge: &EdgeRecord) -> StorageResult<()> {
        let mut list = self.edges.entry(Self::list_key(&edge.src, &edge.edge_name)).or_default();
        if list.by_dst.contains_key(&edge.dst) {
            return Err(StorageError::AlreadyExists(format!(
                "{}/{}/{}",
                edge.src, edge.edge_name, edge.dst
            )));
        }
        list.by_dst.insert(edge.dst.clone(), edge.sort_value.clone());
        list.by_sort.insert((edge.sort_value.clone(), edge.dst.clone()));
        Ok(())
    }

    async fn delete_edge(&self, src: &str, name: &str, dst: &str) -> StorageResult<()> {
        if let Some(mut list) = self.edges.get_mut(&Self::list_key(src, name)) {
            if let Some(sort_value) = list.by_dst.remove(dst) {
                list.by_sort.remove(&(sort_value, dst.to_string()));
            }
        }
        Ok(())
    }

    async fn get_edges(&self, src: &str, name: &str, count: usize, after: Option<&str>) -> StorageResult<Vec<String>> {
        let Some(list) = self.edges.get(&Self::list_key(src, name)) else {
            return Ok(Vec::new());
        };

        let page = match after {
            Some(cursor) => match list.by_dst.get(cursor) {
                Some(sort_value) => list
                    .by_sort
                    .range(..(sort_value.clone(), cursor.to_string()))
                    .rev()
                    .take(count)
                    .map(|(_, dst)| dst.clone())
                    .collect(),
                None => {
                    tracing::debug!(src, name, cursor, "Unknown edge cursor");
                    Vec::new()
                }
            },
            None => list.by_sort.iter().rev().take(count).map(|(_, dst)| dst.clone()).collect(),
        };
        Ok(page)
    }

    async fn get_edge_count(&self, src: &str, name: &str) -> StorageResult<u64> {
        Ok(self
            .edges
            .get(&Self::list_key(src, name))
            .map_or(0, |list| list.by_dst.len() as u64))
    }

    fn first_and_last_params(&self, page: &[String], _after: Option<&str>) -> PageCursors {
        PageCursors {
            first: page.first().cloned(),
            last: page.last().cloned(),
        }
    }

    async fn save_event(&self, event: &EventRecord) -> StorageResult<()> {
        match self.events.entry(event.id.clone()) {
            Entry::Occupied(_) => Err(StorageError::AlreadyExists(event.id.clone())),
            Entry::Vacant(slot) => {
                slot.insert(event.clone());
                Ok(())
            }
        }
    }

    async fn get_event(&self, id: &str) -> StorageResult<Option<EventRecord>> {
        Ok(self.events.get(id).map(|event| event.value().clone()))
    }

    async fn add_unique(&self, key: &str) -> StorageResult<()> {
        if self.unique_keys.insert(key.to_string()) {
            Ok(())
        } else {
            Err(StorageError::AlreadyReserved(key.to_string()))
        }
    }

    async fn remove_unique(&self, key: &str) -> StorageResult<()> {
        self.unique_keys.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::contract;

    #[tokio::test]
    async fn test_check_db_requires_init() {
        let store = MemStore::new();
        assert!(matches!(store.check_db().await, Err(StorageError::SchemaMissing(_))));
        store.init().await.unwrap();
        store.init().await.unwrap();
        assert!(store.check_db().await.is_ok());
    }

    #[tokio::test]
    async fn test_object_contract() {
        contract::objects(&MemStore::new()).await;
    }

    #[tokio::test]
    async fn test_edge_contract() {
        contract::edges(&MemStore::new()).await;
    }

    #[tokio::test]
    async fn test_unique_contract() {
        contract::unique_keys(&MemStore::new()).await;
    }

    #[tokio::test]
    async fn test_event_contract() {
        let store = MemStore::new();
        contract::events(&store).await;
        assert_eq!(store.event_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_cursor_yields_empty_page() {
        let store = MemStore::new();
        contract::edges(&store).await;
        let page = store.get_edges("src", "friends", 10, Some("nobody")).await.unwrap();
        assert!(page.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_unique_reservation() {
        let store = std::sync::Arc::new(MemStore::new());
        let attempts = (0..16).map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.add_unique("user-email-x").await.is_ok() })
        });
        let winners = futures::future::join_all(attempts)
            .await
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count();
        assert_eq!(winners, 1);
    }
}
