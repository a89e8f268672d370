// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! JSON event to point flattening.
//!
//! Converts a nested JSON object into a [`Point`]:
//!
//! - top-level keys listed as tag keys become tags (formatted as text);
//! - nested objects and arrays are flattened into dotted paths
//!   (`a.b.c`, `list.0`, `list.1.name`);
//! - keys listed as ignore keys are never exploded: an object or array
//!   under such a key is stored verbatim as its JSON text;
//! - `null` leaves are dropped.
//!
//! When two paths produce the same dotted key (a literal `"x.y"` key next to
//! a nested `x: {y: ..}`), the value assigned last in key order wins. A tag
//! always wins over a field of the same name: the field is dropped, so tag
//! keys and field keys never overlap.

use crate::line_protocol::{FieldValue, Point};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;

/// Flattening errors.
#[derive(Debug, Error)]
pub enum FlattenError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),
}

impl From<serde_json::Error> for FlattenError {
    fn from(e: serde_json::Error) -> Self {
        FlattenError::MalformedPayload(e.to_string())
    }
}

/// Per-field inclusion rules applied while flattening.
#[derive(Debug, Clone, Default)]
pub struct FlattenRules {
    /// Top-level keys extracted as tags.
    pub tag_keys: HashSet<String>,
    /// Keys whose values are stored whole instead of flattened.
    pub ignore_keys: HashSet<String>,
}

impl FlattenRules {
    /// Build rules from tag and ignore key lists.
    pub fn new<T, I>(tag_keys: T, ignore_keys: I) -> Self
    where
        T: IntoIterator,
        T::Item: Into<String>,
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self {
            tag_keys: tag_keys.into_iter().map(Into::into).collect(),
            ignore_keys: ignore_keys.into_iter().map(Into::into).collect(),
        }
    }

    /// Flatten a raw JSON payload into a point named `measurement`.
    pub fn flatten(&self, payload: &[u8], measurement: &str) -> Result<Point, FlattenError> {
        Ok(self.flatten_object(parse_object(payload)?, measurement))
    }

    /// Flatten an already parsed JSON object.
    pub fn flatten_object(&self, mut data: Map<String, Value>, measurement: &str) -> Point {
        let mut point = Point::new(measurement);

        // Tags: top level only
        for key in &self.tag_keys {
            if let Some(value) = data.remove(key) {
                point.tags.insert(key.clone(), json_to_string(&value));
            }
        }

        let mut flat = BTreeMap::new();
        self.flatten_map(&data, "", &mut flat);

        point.fields = flat
            .into_iter()
            .filter(|(key, _)| !point.tags.contains_key(key))
            .filter_map(|(key, value)| json_to_field_value(&value).map(|v| (key, v)))
            .collect();

        point
    }

    fn flatten_map(&self, map: &Map<String, Value>, prefix: &str, out: &mut BTreeMap<String, Value>) {
        for (key, value) in map {
            let path = join_path(prefix, key);
            if self.ignore_keys.contains(key) {
                out.insert(path, opaque(value));
            } else {
                self.flatten_value(value, path, out);
            }
        }
    }

    fn flatten_value(&self, value: &Value, path: String, out: &mut BTreeMap<String, Value>) {
        match value {
            Value::Object(map) => self.flatten_map(map, &path, out),
            Value::Array(items) => {
                for (i, item) in items.iter().enumerate() {
                    self.flatten_value(item, join_path(&path, &i.to_string()), out);
                }
            }
            scalar => {
                out.insert(path, scalar.clone());
            }
        }
    }
}

/// Flatten `payload` with explicit tag and ignore key sets.
pub fn flatten(
    payload: &[u8],
    measurement: &str,
    tag_keys: &HashSet<String>,
    ignore_keys: &HashSet<String>,
) -> Result<Point, FlattenError> {
    let rules = FlattenRules {
        tag_keys: tag_keys.clone(),
        ignore_keys: ignore_keys.clone(),
    };
    rules.flatten(payload, measurement)
}

/// Parse a payload that must be a JSON object.
pub fn parse_object(payload: &[u8]) -> Result<Map<String, Value>, FlattenError> {
    match serde_json::from_slice(payload)? {
        Value::Object(map) => Ok(map),
        other => Err(FlattenError::MalformedPayload(format!(
            "expected a JSON object, got {}",
            type_name(&other)
        ))),
    }
}

fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{}.{}", prefix, key)
    }
}

/// Structured values under an ignored key are kept as their JSON text.
fn opaque(value: &Value) -> Value {
    match value {
        Value::Object(_) | Value::Array(_) => Value::String(value.to_string()),
        scalar => scalar.clone(),
    }
}

/// Format a JSON value as tag text.
fn json_to_string(val: &Value) -> String {
    match val {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Convert a JSON leaf to a field value, `None` for anything that is not a
/// float, integer, string or boolean.
fn json_to_field_value(val: &Value) -> Option<FieldValue> {
    match val {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(FieldValue::Integer(i))
            } else {
                n.as_f64().map(FieldValue::Float)
            }
        }
        Value::String(s) => Some(FieldValue::String(s.clone())),
        Value::Bool(b) => Some(FieldValue::Boolean(*b)),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn type_name(val: &Value) -> &'static str {
    match val {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
