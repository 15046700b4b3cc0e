//! Record types shared by the schema, storage and service layers
//!
//! Objects are flat JSON documents on the wire and in storage; `ObjectRecord`
//! lifts the managed keys (`id`, `object_type`, timestamps) into typed fields and
//! keeps everything else in an ordered field map.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};

/// Field map of an object or nested structure
pub type Fields = serde_json::Map<String, Value>;

/// Keys managed by the store and never writable through field maps
pub const RESERVED_FIELDS: [&str; 5] = ["id", "object_type", "created_at", "modified_at", "deleted_at"];

/// Object type name used for change events
pub const EVENT_TYPE: &str = "event";

/// Check whether a key is managed by the store
pub fn is_reserved(field: &str) -> bool {
    RESERVED_FIELDS.contains(&field)
}

/// A stored object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    /// Opaque id ending with the type code
    pub id: String,
    /// Registered object type
    pub object_type: String,
    /// Creation time, immutable
    pub created_at: DateTime<Utc>,
    /// Time of the last accepted mutation
    pub modified_at: DateTime<Utc>,
    /// Soft-delete marker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    /// Schema-validated user fields
    #[serde(flatten)]
    pub fields: Fields,
}

impl ObjectRecord {
    /// Create a fresh record with both timestamps set to `now`
    pub fn new(id: String, object_type: String, fields: Fields, now: DateTime<Utc>) -> Self {
        Self {
            id,
            object_type,
            created_at: now,
            modified_at: now,
            deleted_at: None,
            fields,
        }
    }

    /// Whether the object carries a soft-delete marker
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Flatten into the storage document shape
    pub fn to_document(&self) -> Fields {
        let mut doc = Fields::new();
        doc.insert("id".to_string(), Value::String(self.id.clone()));
        doc.insert("object_type".to_string(), Value::String(self.object_type.clone()));
        doc.insert("created_at".to_string(), timestamp_value(&self.created_at));
        doc.insert("modified_at".to_string(), timestamp_value(&self.modified_at));
        if let Some(deleted_at) = &self.deleted_at {
            doc.insert("deleted_at".to_string(), timestamp_value(deleted_at));
        }
        for (key, value) in &self.fields {
            doc.insert(key.clone(), value.clone());
        }
        doc
    }

    /// Rebuild a record from a storage document
    pub fn from_document(doc: Fields) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(doc))
    }
}

/// Render a timestamp the way documents store it
pub fn timestamp_value(ts: &DateTime<Utc>) -> Value {
    Value::String(ts.to_rfc3339_opts(chrono::SecondsFormat::Micros, true))
}

/// A stored edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRecord {
    /// Source object id
    pub src: String,
    /// Edge name declared on the source type
    pub edge_name: String,
    /// Destination object id
    pub dst: String,
    /// Ordering key, monotonic with creation order
    pub sort_value: String,
}

/// Edge triple carried by edge events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRef {
    /// Source object id
    pub src: String,
    /// Edge name
    pub name: String,
    /// Destination object id
    pub dst: String,
}

/// Mutation kind recorded on events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    /// Create
    Post,
    /// Update
    Put,
    /// Delete
    Delete,
}

/// What an event is about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSubject {
    /// Object id
    Object(String),
    /// Edge triple
    Edge(EdgeRef),
}

/// Append-only change event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Event id, generated with the `event` type code
    pub id: String,
    /// Always `event`
    pub object_type: String,
    /// Mutation kind
    pub method: Method,
    /// Mutated object or edge
    #[serde(flatten)]
    pub subject: EventSubject,
    /// State after the mutation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<Fields>,
    /// State before the mutation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous: Option<Fields>,
    /// Microseconds since the Unix epoch
    pub created_at: i64,
    /// Author of the mutation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// Strictly increasing microsecond clock
///
/// Two readings never return the same value, even when the wall clock stalls
/// or steps backwards.
#[derive(Debug, Default)]
pub struct MicrosClock {
    last: AtomicI64,
}

impl MicrosClock {
    /// Create a clock
    pub fn new() -> Self {
        Self::default()
    }

    /// Next reading
    pub fn now(&self) -> i64 {
        let wall = Utc::now().timestamp_micros();
        let prev = self
            .last
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| Some(wall.max(last + 1)))
            .unwrap_or_else(|last| last);
        wall.max(prev + 1)
    }

    /// Next reading as a fixed-width string whose lexical order matches numeric order
    pub fn sort_value(&self) -> String {
        format!("{:020}", self.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_document_round_trip_keeps_fields() {
        let mut fields = Fields::new();
        fields.insert("email".to_string(), json!("a@example.com"));
        let record = ObjectRecord::new("x-01".into(), "user".into(), fields, Utc::now());

        let doc = record.to_document();
        assert_eq!(doc["id"], json!("x-01"));
        assert!(doc.get("deleted_at").is_none());

        let back = ObjectRecord::from_document(doc).unwrap();
        assert_eq!(back.fields["email"], json!("a@example.com"));
        assert!(!back.fields.contains_key("id"));
        assert_eq!(back.id, record.id);
    }

    #[test]
    fn test_event_subject_flattens() {
        let event = EventRecord {
            id: "e-00".into(),
            object_type: EVENT_TYPE.into(),
            method: Method::Delete,
            subject: EventSubject::Edge(EdgeRef {
                src: "a".into(),
                name: "friends".into(),
                dst: "b".into(),
            }),
            current: None,
            previous: None,
            created_at: 1,
            user: Some("alice".into()),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["method"], json!("DELETE"));
        assert_eq!(value["edge"]["name"], json!("friends"));
        assert!(value.get("current").is_none());

        let back: EventRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_clock_strictly_increasing() {
        let clock = MicrosClock::new();
        let mut last = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > last);
            last = next;
        }
        assert!(clock.sort_value() > format!("{:020}", last));
    }
}
