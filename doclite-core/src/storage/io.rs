// storage/io.rs
// Document row I/O against the engine

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;

use crate::document::{Document, DocumentMeta};
use crate::error::{DocLiteError, Result};

/// Insert a new document row. A reused identifier (in any collection) is a `Conflict`.
pub fn insert_document(conn: &Connection, doc: &Document) -> Result<()> {
    let data = doc.to_json()?;
    conn.prepare_cached("INSERT INTO documents (id, collection, data) VALUES (?1, ?2, ?3)")?
        .execute(params![doc.id, doc.collection, data])
        .map_err(|e| annotate_conflict(e.into(), &doc.id))?;
    Ok(())
}

/// Overwrite the stored payload. Returns false when no such document exists in the collection.
pub fn replace_document(conn: &Connection, collection: &str, id: &str, payload: &Value) -> Result<bool> {
    let data = serde_json::to_string(payload)?;
    let changed = conn
        .prepare_cached(
            "UPDATE documents SET data = ?1, updated_at = CURRENT_TIMESTAMP
             WHERE id = ?2 AND collection = ?3",
        )?
        .execute(params![data, id, collection])
        .map_err(|e| annotate_conflict(e.into(), id))?;
    Ok(changed > 0)
}

pub fn delete_document(conn: &Connection, collection: &str, id: &str) -> Result<bool> {
    let removed = conn
        .prepare_cached("DELETE FROM documents WHERE id = ?1 AND collection = ?2")?
        .execute(params![id, collection])?;
    Ok(removed > 0)
}

pub fn fetch_document(conn: &Connection, collection: &str, id: &str) -> Result<Option<Document>> {
    let data: Option<String> = conn
        .query_row(
            "SELECT data FROM documents WHERE id = ?1 AND collection = ?2",
            params![id, collection],
            |row| row.get(0),
        )
        .optional()?;

    data.map(|data| Document::from_stored(id.to_string(), collection.to_string(), &data))
        .transpose()
}

pub fn fetch_meta(conn: &Connection, collection: &str, id: &str) -> Result<Option<DocumentMeta>> {
    let meta = conn
        .query_row(
            "SELECT created_at, updated_at FROM documents WHERE id = ?1 AND collection = ?2",
            params![id, collection],
            |row| {
                Ok(DocumentMeta {
                    id: id.to_string(),
                    collection: collection.to_string(),
                    created_at: row.get(0)?,
                    updated_at: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(meta)
}

pub fn count_documents(conn: &Connection, collection: &str) -> Result<u64> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM documents WHERE collection = ?1",
        params![collection],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

fn annotate_conflict(err: DocLiteError, id: &str) -> DocLiteError {
    match err {
        DocLiteError::Conflict(detail) if detail.contains("documents.id") => {
            DocLiteError::Conflict(format!("document '{}' already exists", id))
        }
        DocLiteError::Conflict(detail) => {
            DocLiteError::Conflict(format!("document '{}': {}", id, detail))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::storage::init_schema;
    use serde_json::json;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    #[test]
    fn test_insert_and_fetch() {
        let conn = conn();
        let doc = Document::new("a1".into(), "users", json!({"name": "Alice"})).unwrap();
        insert_document(&conn, &doc).unwrap();

        let fetched = fetch_document(&conn, "users", "a1").unwrap().unwrap();
        assert_eq!(fetched, doc);
        assert!(fetch_document(&conn, "orders", "a1").unwrap().is_none());
        assert_eq!(count_documents(&conn, "users").unwrap(), 1);
    }

    #[test]
    fn test_identifier_is_global() {
        let conn = conn();
        let doc = Document::new("same".into(), "users", json!({})).unwrap();
        insert_document(&conn, &doc).unwrap();

        let other = Document::new("same".into(), "orders", json!({})).unwrap();
        let err = insert_document(&conn, &other).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(err.to_string().contains("same"));
    }

    #[test]
    fn test_replace_and_delete() {
        let conn = conn();
        let doc = Document::new("a1".into(), "users", json!({"n": 1})).unwrap();
        insert_document(&conn, &doc).unwrap();

        assert!(replace_document(&conn, "users", "a1", &json!({"_id": "a1", "n": 2})).unwrap());
        assert!(!replace_document(&conn, "users", "zz", &json!({})).unwrap());
        let fetched = fetch_document(&conn, "users", "a1").unwrap().unwrap();
        assert_eq!(fetched.get("n"), Some(&json!(2)));

        assert!(delete_document(&conn, "users", "a1").unwrap());
        assert!(!delete_document(&conn, "users", "a1").unwrap());
    }

    #[test]
    fn test_meta_timestamps() {
        let conn = conn();
        let doc = Document::new("a1".into(), "users", json!({})).unwrap();
        insert_document(&conn, &doc).unwrap();

        let meta = fetch_meta(&conn, "users", "a1").unwrap().unwrap();
        assert_eq!(meta.id, "a1");
        assert!(meta.updated_at >= meta.created_at);
        assert!(fetch_meta(&conn, "users", "missing").unwrap().is_none());
    }
}
