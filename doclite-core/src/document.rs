// src/document.rs
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{DocLiteError, Result};
use crate::path::ID_FIELD;

/// Store-wide unique document identifier
pub type DocumentId = String;

/// Generate a new random identifier (UUID v4)
pub fn new_document_id() -> DocumentId {
    Uuid::new_v4().to_string()
}

/// Schemaless document: identifier, owning collection and nested payload.
///
/// The identifier is also embedded in the payload under `_id`, so a serialized
/// payload is self-describing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub collection: String,
    pub payload: Map<String, Value>,
}

impl Document {
    /// Build a document from a payload value, stamping `_id` into it.
    pub fn new(id: DocumentId, collection: &str, payload: Value) -> Result<Self> {
        let mut payload = match payload {
            Value::Object(map) => map,
            other => {
                return Err(DocLiteError::Validation(format!(
                    "document payload must be a mapping, got {}",
                    type_name(&other)
                )))
            }
        };
        payload.insert(ID_FIELD.to_string(), Value::String(id.clone()));

        Ok(Document {
            id,
            collection: collection.to_string(),
            payload,
        })
    }

    /// Rebuild from a stored row.
    pub fn from_stored(id: DocumentId, collection: String, data: &str) -> Result<Self> {
        let payload: Map<String, Value> = serde_json::from_str(data)?;
        Ok(Document { id, collection, payload })
    }

    /// Serialized payload as stored by the engine
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.payload)?)
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.payload)
    }
}

/// Engine-maintained bookkeeping for a stored document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub id: DocumentId,
    pub collection: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
