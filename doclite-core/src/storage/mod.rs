// storage/mod.rs
// Engine schema and value conversion for the SQLite collaborator

pub mod io;
pub mod metadata;

use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use serde_json::Value;

use crate::error::Result;

pub use metadata::CollectionMetadata;

/// Tables: one shared document store, collection metadata, index metadata.
///
/// `documents.id` is the primary key, so identifiers are unique across collections.
const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        collection TEXT NOT NULL,
        data TEXT NOT NULL,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    );

    CREATE INDEX IF NOT EXISTS documents_by_collection ON documents(collection);
    CREATE INDEX IF NOT EXISTS documents_by_collection_id ON documents(collection, id);

    CREATE TABLE IF NOT EXISTS collections (
        name TEXT PRIMARY KEY,
        metadata TEXT NOT NULL,
        created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
    );

    CREATE TABLE IF NOT EXISTS indexes (
        name TEXT PRIMARY KEY,
        collection TEXT NOT NULL,
        fields TEXT NOT NULL,
        type TEXT NOT NULL,
        unique_index INTEGER NOT NULL
    );
";

/// Create the schema if it does not exist yet.
pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

/// Bind a JSON value the way `json_extract` would return it: booleans as 0/1,
/// mappings and sequences as compact JSON text.
pub fn json_to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                SqlValue::Integer(i)
            } else {
                SqlValue::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// Quote an identifier that already passed `validate_name`
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name)
}
