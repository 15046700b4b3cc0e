//! Validation engine
//!
//! Validates a field map against a compiled [`Schema`], filling in defaults in
//! place. The first violation wins: extra fields are rejected before any field
//! is looked at, then each declared field is checked in declaration order for
//! null, default, required, type and enum, in that order.

use super::{FieldKind, FieldSpec, NamedValidator, Schema, SchemaRef, SchemaRegistry};
use crate::core::error::{GraphError, Result};
use crate::core::ids::reference_code;
use crate::core::types::Fields;
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(concat!(
        r"^[-a-z0-9~!$%^&*_=+}{'?]+(\.[-a-z0-9~!$%^&*_=+}{'?]+)*@",
        r"([a-z0-9_][-a-z0-9_]*(\.[-a-z0-9_]+)*\.",
        r"(aero|arpa|biz|com|coop|edu|gov|info|int|mil|museum|name|net|org|pro|travel|mobi|[a-z][a-z])",
        r"|([0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}\.[0-9]{1,3}))(:[0-9]{1,5})?$",
    ))
    .expect("email pattern compiles")
});

impl SchemaRegistry {
    /// Validate the fields of a new or updated object of `object_type`.
    ///
    /// Missing fields with a default receive it.
    pub fn validate(&self, object_type: &str, fields: &mut Fields) -> Result<()> {
        let config = self.object_config(object_type)?;
        self.validate_fields(fields, &config.schema)
    }

    /// Validate a field map against an arbitrary schema
    pub fn validate_fields(&self, fields: &mut Fields, schema: &Schema) -> Result<()> {
        if let Some(extra) = fields.keys().find(|key| !schema.contains(key)) {
            return Err(GraphError::invalid(format!("Unexpected field '{}'", extra)));
        }

        for (name, spec) in schema.fields() {
            if matches!(fields.get(name), Some(Value::Null)) {
                return Err(GraphError::invalid(format!("'{}' can not be null", name)));
            }

            if !fields.contains_key(name) {
                if let Some(default) = &spec.default {
                    fields.insert(name.to_string(), default.clone());
                }
            }

            let Some(value) = fields.get_mut(name) else {
                if spec.required {
                    return Err(GraphError::invalid(format!("'{}' field is required", name)));
                }
                continue;
            };

            self.check_value(name, spec, &spec.kind, value)?;

            if let Some(allowed) = &spec.enumeration {
                if !allowed.contains(value) {
                    return Err(GraphError::invalid(format!(
                        "'{}' must be one of {}",
                        name,
                        Value::Array(allowed.clone())
                    )));
                }
            }
        }

        Ok(())
    }

    fn check_value(
        &self,
        name: &str,
        spec: &FieldSpec,
        kind: &FieldKind,
        value: &mut Value,
    ) -> Result<()> {
        let type_error = || GraphError::invalid(format!("'{}' must be {}", name, kind.name()));

        match kind {
            FieldKind::String { validator } => {
                let s = value.as_str().ok_or_else(type_error)?;
                check_bounds(name, spec, s.chars().count() as f64, "length ")?;
                if let Some(NamedValidator::Email) = validator {
                    if !EMAIL.is_match(s) {
                        return Err(GraphError::invalid(format!("'{}' is not valid email", s)));
                    }
                }
            }
            FieldKind::Number => {
                let n = value.as_f64().filter(|n| n.fract() != 0.0).ok_or_else(type_error)?;
                check_bounds(name, spec, n, "")?;
            }
            FieldKind::Integer => {
                let n = value
                    .as_f64()
                    .filter(|n| n.is_finite() && n.fract() == 0.0)
                    .ok_or_else(type_error)?;
                check_bounds(name, spec, n, "")?;
            }
            FieldKind::Boolean => {
                value.as_bool().ok_or_else(type_error)?;
            }
            FieldKind::Date => {
                if !value.as_str().is_some_and(is_date) {
                    return Err(type_error());
                }
            }
            FieldKind::ObjectId { codes } => {
                let accepted = value
                    .as_str()
                    .and_then(reference_code)
                    .is_some_and(|code| codes.as_ref().map_or(true, |codes| codes.contains(code)));
                if !accepted {
                    return Err(GraphError::invalid(format!(
                        "'{}' must be {} id",
                        name,
                        spec.object_types.join(" or ")
                    )));
                }
            }
            FieldKind::Struct(schema_ref) => {
                let nested = value.as_object_mut().ok_or_else(type_error)?;
                let schema = match schema_ref {
                    SchemaRef::Inline(schema) => schema.as_ref(),
                    SchemaRef::Named(schema_name) => self.custom_schema(schema_name).ok_or_else(|| {
                        GraphError::config(format!("Unknown custom schema '{}'", schema_name))
                    })?,
                };
                self.validate_fields(nested, schema)?;
            }
            FieldKind::Array(element) => {
                let items = value.as_array_mut().ok_or_else(type_error)?;
                check_bounds(name, spec, items.len() as f64, "length ")?;
                // Elements share the field's bounds
                for item in items.iter_mut() {
                    self.check_value(name, spec, element, item)?;
                }
            }
        }

        Ok(())
    }
}

fn check_bounds(name: &str, spec: &FieldSpec, measured: f64, what: &str) -> Result<()> {
    if let Some(min) = spec.min {
        if measured < min {
            return Err(GraphError::invalid(format!(
                "'{}' must have {}greater than or equal to {}",
                name, what, min
            )));
        }
    }
    if let Some(max) = spec.max {
        if measured > max {
            return Err(GraphError::invalid(format!(
                "'{}' must have {}less than or equal to {}",
                name, what, max
            )));
        }
    }
    Ok(())
}

/// Accepts RFC 3339, RFC 2822, plain dates and naive date-times
fn is_date(s: &str) -> bool {
    DateTime::parse_from_rfc3339(s).is_ok()
        || DateTime::parse_from_rfc2822(s).is_ok()
        || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
        || NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").is_ok()
}
