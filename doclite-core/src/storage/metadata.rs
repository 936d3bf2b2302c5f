// storage/metadata.rs
// Collection metadata rows

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Persisted per-collection settings. Only the validator *name* is stored; the
/// implementation must be registered again after a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionMetadata {
    #[serde(default)]
    pub validator: Option<String>,
    #[serde(default)]
    pub options: Map<String, Value>,
}

/// Idempotent upsert of a collection row. Returns true when the row was created.
pub fn ensure_collection(conn: &Connection, name: &str) -> Result<bool> {
    let metadata = serde_json::to_string(&CollectionMetadata::default())?;
    let created = conn.execute(
        "INSERT OR IGNORE INTO collections (name, metadata) VALUES (?1, ?2)",
        params![name, metadata],
    )?;
    if created == 0 {
        conn.execute(
            "UPDATE collections SET updated_at = CURRENT_TIMESTAMP WHERE name = ?1",
            params![name],
        )?;
    }
    Ok(created > 0)
}

pub fn load_metadata(conn: &Connection, name: &str) -> Result<Option<CollectionMetadata>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT metadata FROM collections WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

pub fn save_metadata(conn: &Connection, name: &str, metadata: &CollectionMetadata) -> Result<()> {
    let json = serde_json::to_string(metadata)?;
    conn.execute(
        "INSERT INTO collections (name, metadata) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET metadata = excluded.metadata, updated_at = CURRENT_TIMESTAMP",
        params![name, json],
    )?;
    Ok(())
}

pub fn list_collections(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM collections ORDER BY name")?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(names)
}

/// Remove the collection row and all of its documents. Returns the number of documents removed.
pub fn drop_collection_rows(conn: &Connection, name: &str) -> Result<usize> {
    let removed = conn.execute("DELETE FROM documents WHERE collection = ?1", params![name])?;
    conn.execute("DELETE FROM collections WHERE name = ?1", params![name])?;
    Ok(removed)
}
