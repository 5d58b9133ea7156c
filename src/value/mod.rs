//! Uniform in-memory representation of tree-shaped documents.
//!
//! Every document is parsed once into a [`Value`] and only read afterwards.
//! `Value` deserializes directly from any serde format, so a document read
//! with `serde_json` or `simd-json` never goes through an intermediate tree.

pub mod path;

pub use path::{resolve, resolve_traced, Path, Resolution};

use serde::de::{self, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A leaf value inside a document
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::String(s) => f.write_str(s),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// A parsed document node
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Scalar(Scalar),
    Struct(BTreeMap<String, Value>),
    Array(Vec<Value>),
}

/// Shared `Null` handed out by total lookups.
pub(crate) static NULL: Value = Value::Null;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Field lookup on a struct. Anything else, or a missing field, is `Null`.
    pub fn get(&self, field: &str) -> &Value {
        match self {
            Value::Struct(fields) => fields.get(field).unwrap_or(&NULL),
            _ => &NULL,
        }
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            Value::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// Short shape name used in diagnostics and error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Scalar(Scalar::String(_)) => "string",
            Value::Scalar(Scalar::Int(_)) | Value::Scalar(Scalar::Float(_)) => "number",
            Value::Scalar(Scalar::Bool(_)) => "boolean",
            Value::Struct(_) => "struct",
            Value::Array(_) => "array",
        }
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::Scalar(Scalar::String(s.into()))
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Scalar(Scalar::Bool(b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Scalar(Scalar::Int(i))
                } else {
                    // u64 beyond i64 range and all floats
                    Value::Scalar(Scalar::Float(n.as_f64().unwrap_or(f64::NAN)))
                }
            }
            serde_json::Value::String(s) => Value::Scalar(Scalar::String(s)),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(obj) => Value::Struct(
                obj.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
            ),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Scalar(Scalar::String(s)) => serializer.serialize_str(s),
            Value::Scalar(Scalar::Int(i)) => serializer.serialize_i64(*i),
            Value::Scalar(Scalar::Float(x)) => serializer.serialize_f64(*x),
            Value::Scalar(Scalar::Bool(b)) => serializer.serialize_bool(*b),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Struct(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (k, v) in fields {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a document value")
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<Value, E> {
        Ok(Value::Scalar(Scalar::Bool(v)))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Value, E> {
        Ok(Value::Scalar(Scalar::Int(v)))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Value, E> {
        Ok(match i64::try_from(v) {
            Ok(i) => Value::Scalar(Scalar::Int(i)),
            Err(_) => Value::Scalar(Scalar::Float(v as f64)),
        })
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
        Ok(Value::Scalar(Scalar::Float(v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Value, E> {
        Ok(Value::Scalar(Scalar::String(v.to_owned())))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<Value, E> {
        Ok(Value::Scalar(Scalar::String(v)))
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        Value::deserialize(deserializer)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut fields = BTreeMap::new();
        while let Some((k, v)) = map.next_entry::<String, Value>()? {
            fields.insert(k, v);
        }
        Ok(Value::Struct(fields))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_value() {
        let value = Value::from(json!({
            "id": 7,
            "ratio": 0.5,
            "active": true,
            "name": "Alice",
            "missing": null,
            "tags": ["a", "b"]
        }));

        assert_eq!(value.get("id"), &Value::Scalar(Scalar::Int(7)));
        assert_eq!(value.get("ratio"), &Value::Scalar(Scalar::Float(0.5)));
        assert_eq!(value.get("active"), &Value::Scalar(Scalar::Bool(true)));
        assert_eq!(value.get("name"), &Value::string("Alice"));
        assert!(value.get("missing").is_null());
        assert!(matches!(value.get("tags"), Value::Array(tags) if tags.len() == 2));
        assert!(value.get("nope").is_null());
    }

    #[test]
    fn test_deserialize_matches_conversion() {
        let raw = r#"{"a": {"b": [1, 2.5, "x", false, null]}, "big": 18446744073709551615}"#;
        let parsed: Value = serde_json::from_str(raw).unwrap();
        let converted = Value::from(serde_json::from_str::<serde_json::Value>(raw).unwrap());
        assert_eq!(parsed, converted);
        assert_eq!(parsed.get("big").kind_name(), "number");
    }

    #[test]
    fn test_deserialize_with_simd_json() {
        let mut raw = br#"{"Components": [{"Results": {"code": "8867-4"}}]}"#.to_vec();
        let parsed: Value = simd_json::serde::from_slice(&mut raw).unwrap();
        let Value::Array(components) = parsed.get("Components") else {
            panic!("Components should be an array");
        };
        assert_eq!(components[0].get("Results").get("code"), &Value::string("8867-4"));
    }

    #[test]
    fn test_serialize_roundtrips_through_json() {
        let value = Value::from(json!({"a": [1, {"b": "c"}], "d": null}));
        let text = serde_json::to_string(&value).unwrap();
        assert_eq!(text, r#"{"a":[1,{"b":"c"}],"d":null}"#);
    }

    #[test]
    fn test_get_on_non_struct_is_null() {
        assert!(Value::string("x").get("a").is_null());
        assert!(Value::Array(vec![]).get("a").is_null());
        assert!(Value::Null.get("a").is_null());
    }
}
