//! Runtime Values
//!
//! Parameter values are JSON-shaped, with one addition: [`Value::Skipped`],
//! the typed null produced by every output port of a step whose `when`
//! condition was false. It behaves like null everywhere except that pick-value
//! policies may filter it and a consumer that does not is warned.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Number;

/// Mapping from (short) port name to value.
pub type ValueMap = BTreeMap<String, Value>;

/// A concrete parameter value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    /// Output of a step that did not run
    Skipped,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<Value>),
    Object(ValueMap),
}

impl Value {
    /// True for both ordinary null and the skipped marker.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null | Value::Skipped)
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, Value::Skipped)
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ValueMap> {
        match self {
            Value::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Converts to plain JSON. Skipped markers become null.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null | Value::Skipped => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Value::Number(n.clone()),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Object(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Short type name, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Skipped => "skipped",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Array(_) => "array",
            Value::Object(_) => "object",
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Number(n.into())
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Skipped => write!(f, "<skipped>"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json() {
        let value = Value::from(json!({"a": [1, "two", null, true]}));
        let a = value.as_object().unwrap().get("a").unwrap();

        assert_eq!(a.as_array().unwrap().len(), 4);
        assert_eq!(a.as_array().unwrap()[1], Value::from("two"));
        assert!(a.as_array().unwrap()[2].is_null());
    }

    #[test]
    fn test_skipped_serializes_as_null() {
        let value = Value::Array(vec![Value::Skipped, Value::from(1)]);
        assert_eq!(value.to_json(), json!([null, 1]));
        assert_eq!(serde_json::to_string(&value).unwrap(), "[null,1]");
    }

    #[test]
    fn test_skipped_is_null_like() {
        assert!(Value::Skipped.is_null());
        assert!(Value::Null.is_null());
        assert!(!Value::Null.is_skipped());
        assert!(!Value::from(0).is_null());
    }

    #[test]
    fn test_deserialize_from_yaml() {
        let value: Value = serde_yaml::from_str("[1, 2, {x: y}]").unwrap();
        assert_eq!(value.to_json(), json!([1, 2, {"x": "y"}]));
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::from("hi").to_string(), "\"hi\"");
        assert_eq!(Value::Skipped.to_string(), "<skipped>");
    }
}
