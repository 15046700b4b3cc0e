//! Object operations

use super::pagination::Page;
use super::unique::{self, UniqueTransition};
use super::{Deleted, GraphService};
use crate::core::error::{GraphError, Result};
use crate::core::types::{is_reserved, timestamp_value, Fields, Method, ObjectRecord, RESERVED_FIELDS};
use crate::storage::StorageError;
use crate::system::{Metrics, Timer};
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;

/// Result of a fetch by id list
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Fetched {
    /// Single id: the bare object
    Object(Fields),
    /// Several ids: a page envelope
    Page(Page),
}

fn load_record(doc: Fields) -> Result<ObjectRecord> {
    ObjectRecord::from_document(doc)
        .map_err(|e| GraphError::Storage(StorageError::Corrupt(e.to_string())))
}

fn reject_reserved<'a>(keys: impl IntoIterator<Item = &'a String>) -> Result<()> {
    match keys.into_iter().find(|key| is_reserved(key)) {
        Some(key) => Err(GraphError::invalid(format!("'{}' can not be changed", key))),
        None => Ok(()),
    }
}

impl GraphService {
    /// Fetch one object, or several by a comma-joined id list.
    ///
    /// Every id must resolve to a type before anything is read; any missing
    /// object fails the whole fetch.
    pub async fn get_objects(&self, ids: &str) -> Result<Fetched> {
        let ids: Vec<String> = ids.split(',').map(str::to_string).collect();
        for id in &ids {
            self.registry.type_of(id)?;
        }

        let fetched = join_all(ids.iter().map(|id| self.storage.get_object(id))).await;
        let mut objects = Vec::with_capacity(ids.len());
        for (id, doc) in ids.iter().zip(fetched) {
            objects.push(doc?.ok_or_else(|| GraphError::ObjectNotExists(id.clone()))?);
        }

        if objects.len() > 1 {
            let cursors = self.storage.first_and_last_params(&ids, None);
            return Ok(Fetched::Page(Page::from_objects(objects, cursors)));
        }
        objects
            .pop()
            .map(Fetched::Object)
            .ok_or_else(|| GraphError::ObjectNotExists(String::new()))
    }

    /// Create an object from a type-tagged field map
    pub async fn create_object(&self, mut input: Fields, user: Option<&str>) -> Result<Fields> {
        let timer = Timer::start(&Metrics::global().operations.operation_duration);

        let object_type = match input.remove("object_type") {
            None | Some(Value::Null) => return Err(GraphError::UnknownObjectType),
            Some(Value::String(t)) => t,
            Some(other) => return Err(GraphError::IncorrectObjectType(other.to_string())),
        };
        let config = self.registry.object_config(&object_type)?;
        for key in RESERVED_FIELDS {
            input.remove(key);
        }

        let id = self.registry.codec().generate(&object_type)?;
        self.registry.validate(&object_type, &mut input)?;

        let keys = unique::unique_keys(config, &input);
        unique::reserve(self.storage.as_ref(), &keys).await?;

        let record = ObjectRecord::new(id, object_type, input, Utc::now());
        let doc = record.to_document();
        if let Err(err) = self.storage.create_object(&doc).await {
            unique::rollback(self.storage.as_ref(), &keys).await?;
            return Err(err.into());
        }

        Metrics::global().operations.objects_created.inc();
        tracing::info!(id = %record.id, object_type = %record.object_type, "Object created");

        if !config.suppress_event {
            let event = self.emitter.object_event(
                self.registry.codec(),
                Method::Post,
                Some(doc.clone()),
                None,
                user,
            )?;
            self.emit(event).await?;
        }

        timer.finish();
        Ok(doc)
    }

    /// Apply a field delta and optional field removals to an object.
    ///
    /// An update that leaves every field as it was is a successful no-op: nothing
    /// is written and no event is emitted.
    pub async fn update_object(
        &self,
        id: &str,
        delta: Fields,
        delete_fields: Vec<String>,
        user: Option<&str>,
    ) -> Result<Fields> {
        let timer = Timer::start(&Metrics::global().operations.operation_duration);

        let config = self.registry.config_for_id(id)?;
        reject_reserved(delta.keys())?;
        reject_reserved(delete_fields.iter())?;

        let previous_doc = self
            .storage
            .get_object(id)
            .await?
            .ok_or_else(|| GraphError::ObjectNotExists(id.to_string()))?;
        let previous = load_record(previous_doc.clone())?;
        if previous.is_deleted() {
            return Err(GraphError::ObjectDeleted);
        }

        let mut merged = previous.fields.clone();
        for (key, value) in delta {
            merged.insert(key, value);
        }
        for key in &delete_fields {
            merged.remove(key);
        }

        if merged == previous.fields {
            Metrics::global().operations.noop_updates.inc();
            tracing::debug!(id, "Update without changes skipped");
            timer.finish();
            return Ok(previous_doc);
        }

        self.registry.validate(&config.name, &mut merged)?;

        let transition = UniqueTransition::between(
            &unique::unique_keys(config, &merged),
            &unique::unique_keys(config, &previous.fields),
        );
        unique::reserve(self.storage.as_ref(), &transition.reserve).await?;

        let now = Utc::now();
        let mut changes: Fields = merged
            .iter()
            .filter(|(key, value)| previous.fields.get(*key) != Some(*value))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        changes.insert("modified_at".to_string(), timestamp_value(&now));
        let removed: Vec<String> = previous
            .fields
            .keys()
            .filter(|key| !merged.contains_key(*key))
            .cloned()
            .collect();

        if let Err(err) = self.storage.update_object(id, &changes, &removed).await {
            unique::rollback(self.storage.as_ref(), &transition.reserve).await?;
            return Err(err.into());
        }
        unique::release_stale(self.storage.as_ref(), &transition.release).await;

        let current = ObjectRecord {
            modified_at: now,
            fields: merged,
            ..previous
        };
        let current_doc = current.to_document();

        Metrics::global().operations.objects_updated.inc();
        tracing::info!(id, changed = changes.len() - 1, removed = removed.len(), "Object updated");

        if !config.suppress_event {
            let event = self.emitter.object_event(
                self.registry.codec(),
                Method::Put,
                Some(current_doc.clone()),
                Some(previous_doc),
                user,
            )?;
            self.emit(event).await?;
        }

        timer.finish();
        Ok(current_doc)
    }

    /// Delete an object.
    ///
    /// Volatile types lose the record; all others keep it with `deleted_at` set.
    /// Either way the object's unique values become available again.
    pub async fn delete_object(&self, id: &str, user: Option<&str>) -> Result<Deleted> {
        let timer = Timer::start(&Metrics::global().operations.operation_duration);

        let config = self.registry.config_for_id(id)?;
        let previous_doc = self
            .storage
            .get_object(id)
            .await?
            .ok_or_else(|| GraphError::ObjectNotExists(id.to_string()))?;
        let previous = load_record(previous_doc.clone())?;
        if previous.is_deleted() {
            return Err(GraphError::ObjectDeleted);
        }

        let now = Utc::now();
        if config.volatile {
            self.storage.delete_object(id).await?;
        } else {
            let mut marker = Fields::new();
            marker.insert("deleted_at".to_string(), timestamp_value(&now));
            marker.insert("modified_at".to_string(), timestamp_value(&now));
            self.storage.update_object(id, &marker, &[]).await?;
        }
        unique::release_stale(self.storage.as_ref(), &unique::unique_keys(config, &previous.fields)).await;

        Metrics::global().operations.objects_deleted.inc();
        tracing::info!(id, volatile = config.volatile, "Object deleted");

        if !config.suppress_event {
            let event = self.emitter.object_event(
                self.registry.codec(),
                Method::Delete,
                None,
                Some(previous_doc),
                user,
            )?;
            self.emit(event).await?;
        }

        timer.finish();
        Ok(Deleted { deleted_at: now })
    }
}
