//! Sensor readings as they arrive from the feed.
//!
//! A reading is a flat record of named fields. Values are tagged at the
//! boundary so the aggregator can tell numeric fields from everything else
//! without inspecting raw JSON at every use.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A single field value of a reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Integral number
    Integer(i64),
    /// Floating-point number
    Float(f64),
    /// Anything else (strings, booleans, null, arrays, objects)
    Other(Value),
}

impl FieldValue {
    /// Tag a raw JSON value.
    ///
    /// Booleans are not treated as numbers.
    pub fn from_json(value: Value) -> Self {
        match value {
            Value::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) => FieldValue::Integer(i),
                (None, Some(f)) => FieldValue::Float(f),
                (None, None) => FieldValue::Other(Value::Number(n)),
            },
            other => FieldValue::Other(other),
        }
    }

    /// Numeric value, if this field is numeric.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(i) => Some(*i as f64),
            FieldValue::Float(f) => Some(*f),
            FieldValue::Other(_) => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        !matches!(self, FieldValue::Other(_))
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, FieldValue::Integer(_))
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Integer(value)
    }
}

impl From<i32> for FieldValue {
    fn from(value: i32) -> Self {
        FieldValue::Integer(value.into())
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Float(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Other(Value::String(value.to_string()))
    }
}

/// A record of named sensor values.
///
/// No schema is enforced; two readings may carry entirely different keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Reading {
    fields: BTreeMap<String, FieldValue>,
}

impl Reading {
    /// Create an empty reading.
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode a UTF-8 JSON object payload.
    pub fn from_json_slice(payload: &[u8]) -> Result<Self, DecodeError> {
        let text =
            std::str::from_utf8(payload).map_err(|e| DecodeError::InvalidUtf8(e.to_string()))?;
        let value: Value =
            serde_json::from_str(text).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

        match value {
            Value::Object(map) => Ok(map
                .into_iter()
                .map(|(key, value)| (key, FieldValue::from_json(value)))
                .collect()),
            other => Err(DecodeError::NotAnObject(json_kind(&other))),
        }
    }

    /// Encode as a compact JSON object.
    pub fn to_json_string(&self) -> String {
        // A map of strings to plain JSON values always serializes.
        serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
    }

    /// Builder-style field insertion.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, FieldValue)> for Reading {
    fn from_iter<I: IntoIterator<Item = (String, FieldValue)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Errors decoding a feed payload into a reading.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodeError {
    InvalidUtf8(String),
    InvalidJson(String),
    NotAnObject(&'static str),
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::InvalidUtf8(e) => write!(f, "Payload is not UTF-8: {e}"),
            DecodeError::InvalidJson(e) => write!(f, "Payload is not valid JSON: {e}"),
            DecodeError::NotAnObject(kind) => {
                write!(f, "Expected a JSON object, got {kind}")
            }
        }
    }
}

impl std::error::Error for DecodeError {}
