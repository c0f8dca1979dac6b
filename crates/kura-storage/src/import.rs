//! Structured import of entry content.
//!
//! [`DataSource::read_structured`](crate::DataSource::read_structured)
//! hands the raw bytes of an entry to an [`Importer`] and keeps the first
//! record it produces.

use std::io::Read;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ImportError;

/// Attribute naming a record's type in imported documents.
pub const TYPE_ATTRIBUTE: &str = "type";

/// Generic, dynamically typed record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataObject {
    /// Record type, when the source names one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_name: Option<String>,
    /// Attributes; values may nest lists and objects.
    #[serde(default)]
    pub attributes: Map<String, Value>,
}

impl DataObject {
    pub fn new(type_name: Option<String>) -> Self {
        Self {
            type_name,
            attributes: Map::new(),
        }
    }

    /// Set an attribute, builder style.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Build from a JSON object; the `type` attribute becomes the type name.
    pub fn from_json_object(mut attributes: Map<String, Value>) -> Self {
        let type_name = match attributes.remove(TYPE_ATTRIBUTE) {
            Some(Value::String(name)) => Some(name),
            Some(other) => {
                attributes.insert(TYPE_ATTRIBUTE.to_string(), other);
                None
            }
            None => None,
        };
        Self {
            type_name,
            attributes,
        }
    }
}

/// Turns entry bytes into structured records.
pub trait Importer: Send + Sync {
    /// Import every top-level record found in `source`.
    fn import(&self, source: &mut dyn Read) -> Result<Vec<DataObject>, ImportError>;
}

/// Importer for JSON documents.
///
/// A top-level object is one record, a top-level array yields one record per
/// object element, and `null` or an empty document yields nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonImporter;

impl Importer for JsonImporter {
    fn import(&self, source: &mut dyn Read) -> Result<Vec<DataObject>, ImportError> {
        let mut text = String::new();
        source.read_to_string(&mut text)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        match serde_json::from_str::<Value>(&text)? {
            Value::Null => Ok(Vec::new()),
            Value::Object(map) => Ok(vec![DataObject::from_json_object(map)]),
            Value::Array(items) => items
                .into_iter()
                .map(|item| match item {
                    Value::Object(map) => Ok(DataObject::from_json_object(map)),
                    other => Err(format!("expected an object, found {other}").into()),
                })
                .collect(),
            other => Err(format!("expected an object or array, found {other}").into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn import(text: &str) -> Result<Vec<DataObject>, ImportError> {
        JsonImporter.import(&mut text.as_bytes())
    }

    #[test]
    fn test_single_object() {
        let records = import(r#"{"type": "person", "name": "Amy", "tags": ["a", "b"]}"#).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].type_name.as_deref(), Some("person"));
        assert_eq!(records[0].get("name"), Some(&json!("Amy")));
        assert_eq!(records[0].get("tags"), Some(&json!(["a", "b"])));
    }

    #[test]
    fn test_array_of_objects() {
        let records = import(r#"[{"n": 1}, {"n": 2}]"#).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].get("n"), Some(&json!(2)));
        assert!(records[0].type_name.is_none());
    }

    #[test]
    fn test_empty_yields_nothing() {
        assert!(import("").unwrap().is_empty());
        assert!(import("  null ").unwrap().is_empty());
        assert!(import("[]").unwrap().is_empty());
    }

    #[test]
    fn test_rejects_scalars_and_garbage() {
        assert!(import("42").is_err());
        assert!(import("[1]").is_err());
        assert!(import("{not json").is_err());
    }

    #[test]
    fn test_non_string_type_kept_as_attribute() {
        let records = import(r#"{"type": 7}"#).unwrap();
        assert!(records[0].type_name.is_none());
        assert_eq!(records[0].get("type"), Some(&json!(7)));
    }

    #[test]
    fn test_builder() {
        let obj = DataObject::new(Some("doc".into())).with("title", "x").with("pages", 3);
        assert_eq!(obj.get("pages"), Some(&json!(3)));
    }
}
