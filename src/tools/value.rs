//! Tagged value type and schema validation for tool inputs.
//!
//! Tool payloads cross the core boundary as opaque key→value maps. Each tool
//! registers a schema once at boot; inputs are validated structurally before
//! anything else happens.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolValue {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<ToolValue>),
    Map(BTreeMap<String, ToolValue>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Map,
}

impl ValueKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Map => "map",
        }
    }
}

impl ToolValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Null => ValueKind::Null,
            Self::Bool(_) => ValueKind::Bool,
            Self::Number(_) => ValueKind::Number,
            Self::String(_) => ValueKind::String,
            Self::Array(_) => ValueKind::Array,
            Self::Map(_) => ValueKind::Map,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, ToolValue>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Field lookup on a map value.
    pub fn get(&self, key: &str) -> Option<&ToolValue> {
        self.as_map().and_then(|m| m.get(key))
    }

    pub fn object(entries: impl IntoIterator<Item = (&'static str, ToolValue)>) -> Self {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        )
    }
}

impl From<Value> for ToolValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n.as_f64().unwrap_or(0.0)),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(k, v)| (k, ToolValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&ToolValue> for Value {
    fn from(value: &ToolValue) -> Self {
        match value {
            ToolValue::Null => Value::Null,
            ToolValue::Bool(b) => Value::Bool(*b),
            ToolValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ToolValue::String(s) => Value::String(s.clone()),
            ToolValue::Array(items) => Value::Array(items.iter().map(Into::into).collect()),
            ToolValue::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), Value::from(v)))
                    .collect(),
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub kind: ValueKind,
    pub required: bool,
    pub description: String,
}

/// Structural schema for a tool's input map.
///
/// Required fields must be present with the declared kind; optional fields
/// are type-checked when present; unknown fields pass through untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolSchema {
    fields: BTreeMap<String, FieldSpec>,
}

impl ToolSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn field(
        mut self,
        name: impl Into<String>,
        kind: ValueKind,
        description: impl Into<String>,
    ) -> Self {
        self.fields.insert(
            name.into(),
            FieldSpec {
                kind,
                required: true,
                description: description.into(),
            },
        );
        self
    }

    pub fn optional_field(
        mut self,
        name: impl Into<String>,
        kind: ValueKind,
        description: impl Into<String>,
    ) -> Self {
        self.fields.insert(
            name.into(),
            FieldSpec {
                kind,
                required: false,
                description: description.into(),
            },
        );
        self
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldSpec> {
        &self.fields
    }

    pub fn validate(&self, input: &ToolValue) -> std::result::Result<(), String> {
        let Some(map) = input.as_map() else {
            return Err(format!(
                "expected a map input, got {}",
                input.kind().as_str()
            ));
        };

        for (name, spec) in &self.fields {
            match map.get(name) {
                Some(value) => {
                    if value.kind() != spec.kind && value.kind() != ValueKind::Null {
                        return Err(format!(
                            "field '{}' expected {}, got {}",
                            name,
                            spec.kind.as_str(),
                            value.kind().as_str()
                        ));
                    }
                    if spec.required && value.kind() == ValueKind::Null {
                        return Err(format!("field '{}' must not be null", name));
                    }
                }
                None if spec.required => {
                    return Err(format!("missing required field '{}'", name));
                }
                None => {}
            }
        }

        Ok(())
    }
}
