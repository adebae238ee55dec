/*!
Schema-free JSON document with selective typed access.

Backed by serde_json with `preserve_order` (fields keep their original order) and
`arbitrary_precision` (numbers keep their original text, so 64-bit ids and large
memory limits are never reformatted as floats).

A JSON `null` is treated like an absent field by the typed accessors: the engine's
own clients serialize empty lists as `null` (e.g. `"Binds": null`).
*/

use crate::errors::JsonError;
use serde_json::{Map, Value};

/// A decoded JSON object.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    fields: Map<String, Value>,
}

impl Document {
    /// Decode bytes into a document; the top-level value must be an object.
    pub fn decode(bytes: &[u8]) -> Result<Document, JsonError> {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(fields)) => Ok(Document { fields }),
            Ok(_) => Err(JsonError::Malformed("top-level value is not an object".into())),
            Err(e) => Err(JsonError::Malformed(e.to_string())),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        // Serializing a Map of Values cannot fail (all keys are strings).
        serde_json::to_vec(&self.fields).unwrap_or_default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).filter(|v| !v.is_null())
    }

    /// Read `name` as an ordered list of strings.
    pub fn field_as_string_list(&self, name: &str) -> Result<Vec<String>, JsonError> {
        let value = self
            .get(name)
            .ok_or_else(|| JsonError::MissingField(name.to_string()))?;
        let wrong = || JsonError::WrongType {
            field: name.to_string(),
            expected: "an array of strings",
        };
        let items = value.as_array().ok_or_else(wrong)?;
        items
            .iter()
            .map(|v| v.as_str().map(str::to_string).ok_or_else(wrong))
            .collect()
    }

    /// Like `field_as_string_list`, but an absent (or null) field reads as empty.
    pub fn optional_string_list(&self, name: &str) -> Result<Vec<String>, JsonError> {
        match self.field_as_string_list(name) {
            Err(JsonError::MissingField(_)) => Ok(Vec::new()),
            other => other,
        }
    }

    /// Read `name` as a nested document (a copy; write it back with `set_field`).
    pub fn field_as_object(&self, name: &str) -> Result<Document, JsonError> {
        match self.get(name) {
            None => Err(JsonError::MissingField(name.to_string())),
            Some(Value::Object(fields)) => Ok(Document {
                fields: fields.clone(),
            }),
            Some(_) => Err(JsonError::WrongType {
                field: name.to_string(),
                expected: "an object",
            }),
        }
    }

    /// Replace or insert a field. An existing field keeps its position.
    pub fn set_field(&mut self, name: &str, value: impl Into<Value>) {
        self.fields.insert(name.to_string(), value.into());
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.fields)
    }
}

impl From<Document> for Value {
    fn from(doc: Document) -> Self {
        doc.into_value()
    }
}
