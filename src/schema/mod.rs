//! Schema registry
//!
//! The graph definition is a JSON document of the shape
//!
//! ```json
//! {
//!   "user": {"code": "01", "fields": {...}, "edges": {"friends": {"contains": ["user"]}}},
//!   "event": {"code": "00"},
//!   "custom_schemas": {"name": {"given": {"type": "string"}}},
//!   "common_fields": {"tags": {"type": "array:string"}},
//!   "pagination": {"default_count": 25, "max_count": 100}
//! }
//! ```
//!
//! It is compiled once at startup into an immutable [`SchemaRegistry`]. Field
//! type strings become closed [`FieldKind`] variants, so unknown kinds, unknown
//! validators and dangling type references fail here rather than at request time.

pub mod validate;

use crate::core::error::{GraphError, Result};
use crate::core::ids::IdCodec;
use crate::core::types::{is_reserved, EVENT_TYPE};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

const CUSTOM_SCHEMAS: &str = "custom_schemas";
const COMMON_FIELDS: &str = "common_fields";
const PAGINATION: &str = "pagination";

/// Wildcard accepted in `object_types` of reference fields
pub const ANY_TYPE: &str = "any";

/// Page size settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Page size used when the request has no `count`
    pub default_count: usize,
    /// Largest accepted `count`
    pub max_count: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            default_count: 25,
            max_count: 100,
        }
    }
}

/// Field declaration as written in the graph document
#[derive(Debug, Clone, Deserialize)]
struct RawField {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    subtype: Option<String>,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
    #[serde(default)]
    required: bool,
    #[serde(default)]
    default: Option<Value>,
    #[serde(default)]
    unique: bool,
    #[serde(default, rename = "enum")]
    enumeration: Option<Vec<Value>>,
    #[serde(default)]
    object_types: Option<Vec<String>>,
    #[serde(default)]
    schema: Option<Value>,
    #[serde(default)]
    validator: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawEdge {
    #[serde(default)]
    contains: Vec<String>,
    #[serde(default)]
    pagination: Option<PaginationConfig>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawType {
    code: String,
    #[serde(default)]
    fields: serde_json::Map<String, Value>,
    #[serde(default)]
    edges: serde_json::Map<String, Value>,
    #[serde(default)]
    suppress_event: bool,
    #[serde(default)]
    volatile: bool,
}

/// Named string validators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedValidator {
    /// RFC-ish email address
    Email,
}

impl NamedValidator {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "email" => Some(Self::Email),
            _ => None,
        }
    }

    /// Name used in the graph document
    pub fn name(&self) -> &'static str {
        match self {
            Self::Email => "email",
        }
    }
}

/// Reference to a nested structure schema
#[derive(Debug, Clone)]
pub enum SchemaRef {
    /// Schema declared inline on the field
    Inline(Arc<Schema>),
    /// Shared schema from `custom_schemas`
    Named(String),
}

/// Closed set of field kinds
#[derive(Debug, Clone)]
pub enum FieldKind {
    /// UTF-8 string, bounds apply to its length
    String {
        /// Optional named validator
        validator: Option<NamedValidator>,
    },
    /// Number with a fractional part
    Number,
    /// Number without a fractional part
    Integer,
    /// `true` / `false`
    Boolean,
    /// Parseable date or date-time string
    Date,
    /// Id of an object of one of the listed types
    ObjectId {
        /// Allowed type codes; `None` accepts any code
        codes: Option<BTreeSet<String>>,
    },
    /// Nested structure
    Struct(SchemaRef),
    /// Array whose elements share one kind; bounds apply to its length
    Array(Box<FieldKind>),
}

impl FieldKind {
    /// Type name used in validation messages
    pub fn name(&self) -> &'static str {
        match self {
            Self::String { .. } => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::ObjectId { .. } => "object_id",
            Self::Struct(_) => "struct",
            Self::Array(_) => "array",
        }
    }
}

/// Compiled field declaration
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// Value kind
    pub kind: FieldKind,
    /// Inclusive lower bound (value, or length for strings and arrays)
    pub min: Option<f64>,
    /// Inclusive upper bound
    pub max: Option<f64>,
    /// Field must be present after defaults are applied
    pub required: bool,
    /// Value written when the field is absent
    pub default: Option<Value>,
    /// Value is reserved across all objects of the type
    pub unique: bool,
    /// Allowed values
    pub enumeration: Option<Vec<Value>>,
    /// Declared reference types, kept for messages
    pub object_types: Vec<String>,
}

/// Ordered set of field declarations
#[derive(Debug, Clone, Default)]
pub struct Schema {
    fields: Vec<(String, FieldSpec)>,
    index: HashMap<String, usize>,
}

impl Schema {
    fn push(&mut self, name: String, spec: FieldSpec) {
        match self.index.get(&name) {
            Some(&pos) => self.fields[pos].1 = spec,
            None => {
                self.index.insert(name.clone(), self.fields.len());
                self.fields.push((name, spec));
            }
        }
    }

    /// Declared fields in document order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &FieldSpec)> {
        self.fields.iter().map(|(name, spec)| (name.as_str(), spec))
    }

    /// Look up one field
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.index.get(name).map(|&pos| &self.fields[pos].1)
    }

    /// Whether the field is declared
    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Number of declared fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no fields are declared
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Compiled edge declaration
#[derive(Debug, Clone)]
pub struct EdgeConfig {
    /// Allowed destination types
    pub contains: Vec<String>,
    /// Page size settings for listings of this edge
    pub pagination: PaginationConfig,
}

impl EdgeConfig {
    /// Whether a destination type is allowed
    pub fn accepts(&self, object_type: &str) -> bool {
        self.contains.iter().any(|t| t == object_type)
    }
}

/// Compiled object type
#[derive(Debug, Clone)]
pub struct TypeConfig {
    /// Type name
    pub name: String,
    /// 2-digit id code
    pub code: String,
    /// Own fields merged with `common_fields`
    pub schema: Schema,
    /// Declared edges by name
    pub edges: HashMap<String, EdgeConfig>,
    /// Mutations of this type emit no events
    pub suppress_event: bool,
    /// Deletes remove the record instead of marking it
    pub volatile: bool,
}

impl TypeConfig {
    /// Names of unique-flagged fields
    pub fn unique_fields(&self) -> impl Iterator<Item = &str> {
        self.schema
            .fields()
            .filter(|(_, spec)| spec.unique)
            .map(|(name, _)| name)
    }

    /// Look up an edge declaration
    pub fn edge(&self, name: &str) -> Option<&EdgeConfig> {
        self.edges.get(name)
    }
}

/// Immutable, startup-loaded schema registry
#[derive(Debug)]
pub struct SchemaRegistry {
    types: HashMap<String, TypeConfig>,
    custom_schemas: HashMap<String, Arc<Schema>>,
    codec: IdCodec,
    pagination: PaginationConfig,
    raw: Value,
}

impl SchemaRegistry {
    /// Load the graph document from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            GraphError::config(format!("Failed to read schema file {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&contents)
    }

    /// Parse and compile a JSON graph document
    pub fn from_json_str(contents: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(contents)
            .map_err(|e| GraphError::config(format!("Failed to parse schema: {}", e)))?;
        Self::from_value(value)
    }

    /// Compile a graph document
    pub fn from_value(raw: Value) -> Result<Self> {
        let doc = raw
            .as_object()
            .ok_or_else(|| GraphError::config("Graph definition must be an object"))?;

        let pagination = match doc.get(PAGINATION) {
            Some(value) => parse::<PaginationConfig>(value, PAGINATION)?,
            None => PaginationConfig::default(),
        };
        check_pagination(&pagination, PAGINATION)?;

        let mut raw_types = Vec::new();
        for (name, value) in doc {
            if matches!(name.as_str(), CUSTOM_SCHEMAS | COMMON_FIELDS | PAGINATION) {
                continue;
            }
            raw_types.push((name.clone(), parse::<RawType>(value, name)?));
        }

        let codec = IdCodec::new(raw_types.iter().map(|(name, t)| (name.as_str(), t.code.as_str())))?;
        if codec.code_of(EVENT_TYPE).is_none() {
            return Err(GraphError::config(format!(
                "Graph definition must declare the '{}' type",
                EVENT_TYPE
            )));
        }

        let custom_names: BTreeSet<String> = match doc.get(CUSTOM_SCHEMAS) {
            Some(Value::Object(map)) => map.keys().cloned().collect(),
            Some(_) => return Err(GraphError::config("'custom_schemas' must be an object")),
            None => BTreeSet::new(),
        };
        let compiler = Compiler {
            codec: &codec,
            custom_names: &custom_names,
        };

        let mut custom_schemas = HashMap::new();
        if let Some(Value::Object(map)) = doc.get(CUSTOM_SCHEMAS) {
            for (name, value) in map {
                let schema = compiler.schema(value, &format!("{}.{}", CUSTOM_SCHEMAS, name))?;
                custom_schemas.insert(name.clone(), Arc::new(schema));
            }
        }

        let common = match doc.get(COMMON_FIELDS) {
            Some(value) => compiler.schema(value, COMMON_FIELDS)?,
            None => Schema::default(),
        };

        let mut types = HashMap::new();
        for (name, raw_type) in raw_types {
            let mut schema = common.clone();
            for (field, spec) in compiler.schema_map(&raw_type.fields, &name)?.fields {
                schema.push(field, spec);
            }
            if let Some((field, _)) = schema.fields().find(|(field, _)| is_reserved(field)) {
                return Err(GraphError::config(format!(
                    "Type '{}' declares reserved field '{}'",
                    name, field
                )));
            }

            let mut edges = HashMap::new();
            for (edge_name, value) in &raw_type.edges {
                let raw_edge: RawEdge = parse(value, &format!("{}.edges.{}", name, edge_name))?;
                for dst in &raw_edge.contains {
                    if codec.code_of(dst).is_none() {
                        return Err(GraphError::config(format!(
                            "Edge '{}.{}' contains unknown type '{}'",
                            name, edge_name, dst
                        )));
                    }
                }
                let edge_pagination = raw_edge.pagination.unwrap_or(pagination);
                check_pagination(&edge_pagination, &format!("{}.edges.{}", name, edge_name))?;
                edges.insert(
                    edge_name.clone(),
                    EdgeConfig {
                        contains: raw_edge.contains,
                        pagination: edge_pagination,
                    },
                );
            }

            types.insert(
                name.clone(),
                TypeConfig {
                    code: raw_type.code,
                    name,
                    schema,
                    edges,
                    suppress_event: raw_type.suppress_event,
                    volatile: raw_type.volatile,
                },
            );
        }

        tracing::info!(
            types = types.len(),
            custom_schemas = custom_schemas.len(),
            "Schema registry loaded"
        );

        Ok(Self {
            types,
            custom_schemas,
            codec,
            pagination,
            raw,
        })
    }

    /// Id codec built from the type codes
    pub fn codec(&self) -> &IdCodec {
        &self.codec
    }

    /// Resolve the type of an id
    pub fn type_of(&self, id: &str) -> Result<&str> {
        self.codec.decode(id)
    }

    /// Configuration of a type
    pub fn object_config(&self, object_type: &str) -> Result<&TypeConfig> {
        if object_type.is_empty() {
            return Err(GraphError::UnknownObjectType);
        }
        self.types
            .get(object_type)
            .ok_or_else(|| GraphError::IncorrectObjectType(object_type.to_string()))
    }

    /// Configuration of the type an id belongs to
    pub fn config_for_id(&self, id: &str) -> Result<&TypeConfig> {
        let object_type = self.type_of(id)?;
        self.object_config(object_type)
    }

    /// Shared schema from `custom_schemas`
    pub fn custom_schema(&self, name: &str) -> Option<&Schema> {
        self.custom_schemas.get(name).map(|s| s.as_ref())
    }

    /// Global page size settings
    pub fn pagination(&self) -> PaginationConfig {
        self.pagination
    }

    /// The graph document as loaded
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

fn parse<T: serde::de::DeserializeOwned>(value: &Value, context: &str) -> Result<T> {
    T::deserialize(value).map_err(|e| GraphError::config(format!("Invalid config for '{}': {}", context, e)))
}

fn check_pagination(pagination: &PaginationConfig, context: &str) -> Result<()> {
    if pagination.default_count > pagination.max_count {
        return Err(GraphError::config(format!(
            "'{}': default_count {} exceeds max_count {}",
            context, pagination.default_count, pagination.max_count
        )));
    }
    Ok(())
}

struct Compiler<'a> {
    codec: &'a IdCodec,
    custom_names: &'a BTreeSet<String>,
}

impl Compiler<'_> {
    fn schema(&self, value: &Value, context: &str) -> Result<Schema> {
        match value {
            Value::Object(map) => self.schema_map(map, context),
            _ => Err(GraphError::config(format!("'{}' must be an object of fields", context))),
        }
    }

    fn schema_map(&self, map: &serde_json::Map<String, Value>, context: &str) -> Result<Schema> {
        let mut schema = Schema::default();
        for (name, value) in map {
            let field_context = format!("{}.{}", context, name);
            let raw: RawField = parse(value, &field_context)?;
            schema.push(name.clone(), self.field(&raw, &field_context)?);
        }
        Ok(schema)
    }

    fn field(&self, raw: &RawField, context: &str) -> Result<FieldSpec> {
        let (kind, subtype) = match raw.kind.split_once(':') {
            Some((kind, subtype)) => (kind, Some(subtype)),
            None => (raw.kind.as_str(), raw.subtype.as_deref()),
        };
        let kind = self.kind(kind, subtype, raw, context)?;

        if let (Some(min), Some(max)) = (raw.min, raw.max) {
            if min > max {
                return Err(GraphError::config(format!("'{}': min {} exceeds max {}", context, min, max)));
            }
        }

        Ok(FieldSpec {
            kind,
            min: raw.min,
            max: raw.max,
            required: raw.required,
            default: raw.default.clone(),
            unique: raw.unique,
            enumeration: raw.enumeration.clone(),
            object_types: raw.object_types.clone().unwrap_or_default(),
        })
    }

    fn kind(&self, kind: &str, subtype: Option<&str>, raw: &RawField, context: &str) -> Result<FieldKind> {
        let kind = match kind {
            "string" => {
                let validator = match &raw.validator {
                    Some(name) => Some(NamedValidator::parse(name).ok_or_else(|| {
                        GraphError::config(format!("'{}': unknown validator '{}'", context, name))
                    })?),
                    None => None,
                };
                FieldKind::String { validator }
            }
            "number" => FieldKind::Number,
            "integer" => FieldKind::Integer,
            "boolean" => FieldKind::Boolean,
            "date" => FieldKind::Date,
            "object_id" => FieldKind::ObjectId {
                codes: self.reference_codes(raw, context)?,
            },
            "struct" => FieldKind::Struct(self.struct_ref(raw, context)?),
            "array" => {
                let element = subtype.ok_or_else(|| {
                    GraphError::config(format!("'{}': array needs an element type", context))
                })?;
                let (element, nested) = match element.split_once(':') {
                    Some((element, nested)) => (element, Some(nested)),
                    None => (element, None),
                };
                FieldKind::Array(Box::new(self.kind(element, nested, raw, context)?))
            }
            other => {
                return Err(GraphError::config(format!(
                    "'{}': unknown field type '{}'",
                    context, other
                )))
            }
        };
        Ok(kind)
    }

    fn reference_codes(&self, raw: &RawField, context: &str) -> Result<Option<BTreeSet<String>>> {
        let types = raw.object_types.as_deref().unwrap_or_default();
        if types.is_empty() {
            return Err(GraphError::config(format!("'{}': object_id needs object_types", context)));
        }
        if types.iter().any(|t| t == ANY_TYPE) {
            return Ok(None);
        }
        types
            .iter()
            .map(|t| {
                self.codec.code_of(t).map(str::to_string).ok_or_else(|| {
                    GraphError::config(format!("'{}': unknown object type '{}'", context, t))
                })
            })
            .collect::<Result<BTreeSet<_>>>()
            .map(Some)
    }

    fn struct_ref(&self, raw: &RawField, context: &str) -> Result<SchemaRef> {
        match &raw.schema {
            Some(Value::String(name)) if self.custom_names.contains(name) => Ok(SchemaRef::Named(name.clone())),
            Some(Value::String(name)) => Err(GraphError::config(format!(
                "'{}': unknown custom schema '{}'",
                context, name
            ))),
            Some(value @ Value::Object(_)) => Ok(SchemaRef::Inline(Arc::new(self.schema(value, context)?))),
            _ => Err(GraphError::config(format!("'{}': struct needs a schema", context))),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    /// Graph document shared by tests across the crate
    pub(crate) fn test_graph() -> Value {
        json!({
            "event": {"code": "00"},
            "user": {
                "code": "01",
                "fields": {
                    "email": {"type": "string", "validator": "email", "unique": true, "required": true},
                    "nickname": {"type": "string", "min": 2, "max": 8, "unique": true},
                    "name": {"type": "struct", "schema": "person_name"},
                    "age": {"type": "integer", "min": 0, "max": 150},
                    "score": {"type": "number", "min": 0.5, "max": 9.5},
                    "active": {"type": "boolean", "default": true},
                    "role": {"type": "string", "enum": ["admin", "member"], "default": "member"},
                    "born": {"type": "date"},
                    "best_friend": {"type": "object_id", "object_types": ["user"]},
                    "favorite": {"type": "object_id", "object_types": ["any"]},
                    "aliases": {"type": "array:string", "min": 0, "max": 3},
                    "addresses": {"type": "array:struct", "schema": {
                        "city": {"type": "string", "required": true},
                        "zip": {"type": "integer"}
                    }}
                },
                "edges": {
                    "friends": {"contains": ["user"]},
                    "posts": {"contains": ["post"], "pagination": {"default_count": 2, "max_count": 4}}
                }
            },
            "post": {
                "code": "02",
                "fields": {"title": {"type": "string", "required": true}},
                "edges": {"likes": {"contains": ["user"]}}
            },
            "session": {
                "code": "03",
                "volatile": true,
                "suppress_event": true,
                "fields": {"token": {"type": "string", "unique": true}}
            },
            "custom_schemas": {
                "person_name": {
                    "given": {"type": "string", "required": true},
                    "family": {"type": "string"}
                }
            },
            "common_fields": {
                "tags": {"type": "array:string"}
            },
            "pagination": {"default_count": 3, "max_count": 10}
        })
    }

    pub(crate) fn test_registry() -> SchemaRegistry {
        SchemaRegistry::from_value(test_graph()).unwrap()
    }

    fn with_override(path: &[&str], value: Value) -> Value {
        let mut graph = test_graph();
        let mut cursor = &mut graph;
        for key in &path[..path.len() - 1] {
            cursor = cursor.get_mut(*key).unwrap();
        }
        cursor[path[path.len() - 1]] = value;
        graph
    }

    #[test]
    fn test_registry_loads() {
        let registry = test_registry();
        let user = registry.object_config("user").unwrap();
        assert_eq!(user.code, "01");
        assert!(user.schema.contains("tags"), "common fields are merged");
        assert_eq!(user.unique_fields().collect::<Vec<_>>(), vec!["email", "nickname"]);
        assert_eq!(user.edge("posts").unwrap().pagination.max_count, 4);
        assert_eq!(user.edge("friends").unwrap().pagination.max_count, 10);
        assert!(registry.object_config("session").unwrap().volatile);
        assert!(registry.custom_schema("person_name").is_some());
    }

    #[test]
    fn test_object_config_errors() {
        let registry = test_registry();
        assert!(matches!(registry.object_config(""), Err(GraphError::UnknownObjectType)));
        assert!(matches!(
            registry.object_config("incorrect"),
            Err(GraphError::IncorrectObjectType(_))
        ));
    }

    #[test]
    fn test_field_order_follows_document() {
        let registry = test_registry();
        let user = registry.object_config("user").unwrap();
        let names: Vec<_> = user.schema.fields().map(|(name, _)| name).collect();
        assert_eq!(names[0], "tags");
        assert_eq!(names[1], "email");
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let graph = with_override(&["post", "fields", "title"], json!({"type": "text"}));
        assert!(matches!(SchemaRegistry::from_value(graph), Err(GraphError::Config(_))));
    }

    #[test]
    fn test_unknown_validator_rejected() {
        let graph = with_override(&["post", "fields", "title"], json!({"type": "string", "validator": "phone"}));
        assert!(SchemaRegistry::from_value(graph).is_err());
    }

    #[test]
    fn test_code_collision_rejected() {
        let graph = with_override(&["post", "code"], json!("01"));
        assert!(SchemaRegistry::from_value(graph).is_err());
    }

    #[test]
    fn test_missing_event_type_rejected() {
        let mut graph = test_graph();
        graph.as_object_mut().unwrap().remove("event");
        assert!(SchemaRegistry::from_value(graph).is_err());
    }

    #[test]
    fn test_dangling_references_rejected() {
        let graph = with_override(&["user", "fields", "name"], json!({"type": "struct", "schema": "nope"}));
        assert!(SchemaRegistry::from_value(graph).is_err());

        let graph = with_override(
            &["user", "fields", "best_friend"],
            json!({"type": "object_id", "object_types": ["ghost"]}),
        );
        assert!(SchemaRegistry::from_value(graph).is_err());

        let graph = with_override(&["post", "edges", "likes"], json!({"contains": ["ghost"]}));
        assert!(SchemaRegistry::from_value(graph).is_err());
    }

    #[test]
    fn test_reserved_field_rejected() {
        let graph = with_override(&["post", "fields", "created_at"], json!({"type": "date"}));
        assert!(SchemaRegistry::from_value(graph).is_err());
    }
}
