//! Opaque object identifiers
//!
//! An id is a random UUID followed by `-` and the 2-character code of its
//! object type, e.g. `0f0e5a4c-2b7e-4d55-9c1e-3a1f0d9b8e21-03`. The type of any
//! id can therefore be recovered without a storage round trip.

use crate::core::error::{GraphError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use uuid::Uuid;

/// Length of the type code suffix
pub const CODE_LEN: usize = 2;

/// Shape of a generated id; capture group 1 is the type code
static ID_SHAPE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^[0-9a-f]{8}-[0-9a-f]{4}-[1-5][0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}-([0-9]{2})$",
    )
    .expect("id shape pattern compiles")
});

/// Check that a code is two ASCII digits
pub fn is_valid_code(code: &str) -> bool {
    code.len() == CODE_LEN && code.bytes().all(|b| b.is_ascii_digit())
}

/// Return the type code of a well-formed id, or `None` when the shape is wrong
pub fn reference_code(value: &str) -> Option<&str> {
    ID_SHAPE
        .captures(value)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Bidirectional type/code table, built once when the schema is loaded
#[derive(Debug, Clone, Default)]
pub struct IdCodec {
    type_to_code: HashMap<String, String>,
    code_to_type: HashMap<String, String>,
}

impl IdCodec {
    /// Build the table from `(object_type, code)` pairs.
    ///
    /// Codes must be two digits and unique across all types.
    pub fn new<'a, I>(entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut codec = Self::default();
        for (object_type, code) in entries {
            if !is_valid_code(code) {
                return Err(GraphError::config(format!(
                    "Type '{}' has invalid code '{}': expected {} digits",
                    object_type, code, CODE_LEN
                )));
            }
            if let Some(existing) = codec.code_to_type.get(code) {
                return Err(GraphError::config(format!(
                    "Code '{}' is used by both '{}' and '{}'",
                    code, existing, object_type
                )));
            }
            codec.code_to_type.insert(code.to_string(), object_type.to_string());
            codec.type_to_code.insert(object_type.to_string(), code.to_string());
        }
        Ok(codec)
    }

    /// Generate a fresh id for a registered type
    pub fn generate(&self, object_type: &str) -> Result<String> {
        if object_type.is_empty() {
            return Err(GraphError::UnknownObjectType);
        }
        let code = self
            .type_to_code
            .get(object_type)
            .ok_or_else(|| GraphError::IncorrectObjectType(object_type.to_string()))?;
        Ok(format!("{}-{}", Uuid::new_v4(), code))
    }

    /// Resolve the object type of an id from its trailing code
    pub fn decode<'a>(&'a self, id: &str) -> Result<&'a str> {
        let code = id
            .len()
            .checked_sub(CODE_LEN)
            .filter(|&start| id.is_char_boundary(start))
            .map(|start| &id[start..]);

        code.and_then(|code| self.code_to_type.get(code))
            .map(String::as_str)
            .ok_or_else(|| GraphError::IncorrectObjectId(id.to_string()))
    }

    /// Code of a registered type
    pub fn code_of(&self, object_type: &str) -> Option<&str> {
        self.type_to_code.get(object_type).map(String::as_str)
    }

    /// Registered type names
    pub fn object_types(&self) -> impl Iterator<Item = &str> {
        self.type_to_code.keys().map(String::as_str)
    }
}
