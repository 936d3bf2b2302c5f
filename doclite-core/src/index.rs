// src/index.rs
// Declared secondary indexes: metadata rows plus partial expression indexes in the engine

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::error::{DocLiteError, Result};
use crate::path::{index_expr, validate_field_path, validate_name};
use crate::storage::{metadata, quote_ident};

/// Index types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum IndexType {
    /// Ordered (B-tree) expression index
    #[default]
    BTree,
}

impl IndexType {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexType::BTree => "btree",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "btree" => Ok(IndexType::BTree),
            other => Err(DocLiteError::Plan(format!("unsupported index type: {}", other))),
        }
    }
}

/// Index definition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub name: String,
    pub collection: String,
    pub fields: Vec<String>,
    pub index_type: IndexType,
    pub unique: bool,
}

impl IndexDefinition {
    /// Validate the inputs and derive the deterministic name.
    pub fn new(collection: &str, fields: Vec<String>, unique: bool) -> Result<Self> {
        validate_name("collection", collection)?;
        if fields.is_empty() {
            return Err(DocLiteError::Plan("an index needs at least one field".into()));
        }
        for field in &fields {
            validate_field_path(field)?;
        }

        Ok(IndexDefinition {
            name: derive_name(collection, &fields),
            collection: collection.to_string(),
            fields,
            index_type: IndexType::BTree,
            unique,
        })
    }

    pub fn leading_field(&self) -> &str {
        &self.fields[0]
    }

    /// `CREATE INDEX` statement, scoped to this collection's rows
    pub fn create_sql(&self) -> String {
        let exprs: Vec<String> = self.fields.iter().map(|f| index_expr(f)).collect();
        format!(
            "CREATE {}INDEX IF NOT EXISTS {} ON documents({}) WHERE collection = '{}'",
            if self.unique { "UNIQUE " } else { "" },
            quote_ident(&self.name),
            exprs.join(", "),
            self.collection
        )
    }

    pub fn to_json(&self) -> Value {
        json!({
            "name": self.name,
            "collection": self.collection,
            "fields": self.fields,
            "type": self.index_type.as_str(),
            "unique": self.unique,
        })
    }
}

/// `idx_<collection>_<fields with dots replaced, joined by _>`
pub fn derive_name(collection: &str, fields: &[String]) -> String {
    let safe: Vec<String> = fields.iter().map(|f| f.replace('.', "_")).collect();
    format!("idx_{}_{}", collection, safe.join("_"))
}

/// A single field or an ordered field list
pub trait IndexFields {
    fn into_fields(self) -> Vec<String>;
}

impl IndexFields for &str {
    fn into_fields(self) -> Vec<String> {
        vec![self.to_string()]
    }
}

impl IndexFields for String {
    fn into_fields(self) -> Vec<String> {
        vec![self]
    }
}

impl IndexFields for &String {
    fn into_fields(self) -> Vec<String> {
        vec![self.clone()]
    }
}

impl IndexFields for &[&str] {
    fn into_fields(self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

impl<const N: usize> IndexFields for [&str; N] {
    fn into_fields(self) -> Vec<String> {
        self.iter().map(|s| s.to_string()).collect()
    }
}

impl IndexFields for Vec<&str> {
    fn into_fields(self) -> Vec<String> {
        self.into_iter().map(str::to_string).collect()
    }
}

impl IndexFields for Vec<String> {
    fn into_fields(self) -> Vec<String> {
        self
    }
}

/// Index Manager - keeps the `indexes` table and the physical indexes in step.
///
/// Every method runs on the caller's connection; structural changes are expected to be
/// inside a write transaction so metadata and index never diverge.
pub struct IndexManager;

impl IndexManager {
    /// Create or replace an index. Returns the stored definition.
    pub fn create_index(conn: &Connection, definition: IndexDefinition) -> Result<IndexDefinition> {
        metadata::ensure_collection(conn, &definition.collection)?;

        let existing = Self::get_index(conn, &definition.name)?;
        let physical = Self::physical_exists(conn, &definition.name)?;
        match &existing {
            Some(current) if current.collection != definition.collection => {
                return Err(DocLiteError::Conflict(format!(
                    "index name {} is already used by collection {}",
                    definition.name, current.collection
                )));
            }
            None if physical => {
                return Err(DocLiteError::Conflict(format!(
                    "index name {} is reserved by the store",
                    definition.name
                )));
            }
            _ => {}
        }
        if existing.as_ref() == Some(&definition) && physical {
            debug!("Index {} already exists", definition.name);
            return Ok(definition);
        }
        if physical {
            conn.execute_batch(&format!("DROP INDEX IF EXISTS {}", quote_ident(&definition.name)))?;
        }

        let fields = serde_json::to_string(&definition.fields)?;
        conn.execute(
            "INSERT INTO indexes (name, collection, fields, type, unique_index) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO UPDATE SET
                collection = excluded.collection,
                fields = excluded.fields,
                type = excluded.type,
                unique_index = excluded.unique_index",
            params![
                definition.name,
                definition.collection,
                fields,
                definition.index_type.as_str(),
                definition.unique
            ],
        )?;
        conn.execute_batch(&definition.create_sql())?;

        info!(
            "Created index {} on {}({})",
            definition.name,
            definition.collection,
            definition.fields.join(", ")
        );
        Ok(definition)
    }

    /// Definitions in storage (creation) order, optionally for one collection
    pub fn list_indexes(conn: &Connection, collection: Option<&str>) -> Result<Vec<IndexDefinition>> {
        let mut stmt = conn.prepare(
            "SELECT name, collection, fields, type, unique_index FROM indexes
             WHERE ?1 IS NULL OR collection = ?1
             ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map(params![collection], Self::raw_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Self::from_raw).collect()
    }

    pub fn get_index(conn: &Connection, name: &str) -> Result<Option<IndexDefinition>> {
        let raw = conn
            .query_row(
                "SELECT name, collection, fields, type, unique_index FROM indexes WHERE name = ?1",
                params![name],
                Self::raw_row,
            )
            .optional()?;
        raw.map(Self::from_raw).transpose()
    }

    /// Drop an index and its metadata. Unknown names are a no-op returning `false`.
    pub fn drop_index(conn: &Connection, name: &str) -> Result<bool> {
        validate_name("index", name)?;
        if Self::get_index(conn, name)?.is_none() {
            debug!("Index {} not found, nothing to drop", name);
            return Ok(false);
        }
        conn.execute_batch(&format!("DROP INDEX IF EXISTS {}", quote_ident(name)))?;
        conn.execute("DELETE FROM indexes WHERE name = ?1", params![name])?;
        info!("Dropped index {}", name);
        Ok(true)
    }

    /// Drop every index declared on a collection. Returns how many were removed.
    pub fn drop_collection_indexes(conn: &Connection, collection: &str) -> Result<usize> {
        let definitions = Self::list_indexes(conn, Some(collection))?;
        for definition in &definitions {
            Self::drop_index(conn, &definition.name)?;
        }
        Ok(definitions.len())
    }

    fn physical_exists(conn: &Connection, name: &str) -> Result<bool> {
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1",
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn raw_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<(String, String, String, String, bool)> {
        Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
    }

    fn from_raw(raw: (String, String, String, String, bool)) -> Result<IndexDefinition> {
        let (name, collection, fields, index_type, unique) = raw;
        Ok(IndexDefinition {
            name,
            collection,
            fields: serde_json::from_str(&fields)?,
            index_type: IndexType::parse(&index_type)?,
            unique,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::storage::init_schema;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn
    }

    fn def(collection: &str, fields: impl IndexFields, unique: bool) -> IndexDefinition {
        IndexDefinition::new(collection, fields.into_fields(), unique).unwrap()
    }

    #[test]
    fn test_derive_name() {
        let d = def("users", ["profile.age", "name"], false);
        assert_eq!(d.name, "idx_users_profile_age_name");
        assert_eq!(d.leading_field(), "profile.age");
    }

    #[test]
    fn test_create_sql_is_partial_expression_index() {
        let d = def("users", "email", true);
        assert_eq!(
            d.create_sql(),
            "CREATE UNIQUE INDEX IF NOT EXISTS \"idx_users_email\" ON documents(json_extract(data, '$.email')) WHERE collection = 'users'"
        );
    }

    #[test]
    fn test_create_is_idempotent() {
        let conn = conn();
        IndexManager::create_index(&conn, def("users", "age", false)).unwrap();
        IndexManager::create_index(&conn, def("users", "age", false)).unwrap();

        let listed = IndexManager::list_indexes(&conn, Some("users")).unwrap();
        assert_eq!(listed.len(), 1);
        assert!(IndexManager::physical_exists(&conn, "idx_users_age").unwrap());
    }

    #[test]
    fn test_replace_keeps_storage_order() {
        let conn = conn();
        IndexManager::create_index(&conn, def("users", "age", false)).unwrap();
        IndexManager::create_index(&conn, def("users", "name", false)).unwrap();
        IndexManager::create_index(&conn, def("users", "age", true)).unwrap();

        let listed = IndexManager::list_indexes(&conn, None).unwrap();
        assert_eq!(listed[0].name, "idx_users_age");
        assert!(listed[0].unique);
        assert_eq!(listed[1].name, "idx_users_name");
    }

    #[test]
    fn test_list_filters_by_collection() {
        let conn = conn();
        IndexManager::create_index(&conn, def("users", "age", false)).unwrap();
        IndexManager::create_index(&conn, def("orders", "total", false)).unwrap();

        assert_eq!(IndexManager::list_indexes(&conn, Some("orders")).unwrap().len(), 1);
        assert_eq!(IndexManager::list_indexes(&conn, None).unwrap().len(), 2);
    }

    #[test]
    fn test_drop_index() {
        let conn = conn();
        IndexManager::create_index(&conn, def("users", "age", false)).unwrap();

        assert!(IndexManager::drop_index(&conn, "idx_users_age").unwrap());
        assert!(!IndexManager::physical_exists(&conn, "idx_users_age").unwrap());
        assert!(!IndexManager::drop_index(&conn, "idx_users_age").unwrap());
        assert!(!IndexManager::drop_index(&conn, "never_existed").unwrap());
    }

    #[test]
    fn test_unique_index_over_duplicates_conflicts() {
        let conn = conn();
        conn.execute_batch(
            "INSERT INTO documents (id, collection, data) VALUES
                ('1', 'users', '{\"email\": \"a@x\"}'),
                ('2', 'users', '{\"email\": \"a@x\"}')",
        )
        .unwrap();

        let err = IndexManager::create_index(&conn, def("users", "email", true)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[test]
    fn test_invalid_inputs_rejected() {
        assert!(IndexDefinition::new("users", vec![], false).is_err());
        assert!(IndexDefinition::new("users", vec!["a b".into()], false).is_err());
        assert!(IndexDefinition::new("us'ers", vec!["a".into()], false).is_err());
    }

    #[test]
    fn test_drop_leaves_undeclared_indexes_alone() {
        let conn = conn();
        assert!(!IndexManager::drop_index(&conn, "documents_by_collection").unwrap());
        assert!(IndexManager::physical_exists(&conn, "documents_by_collection").unwrap());
    }

    #[test]
    fn test_create_rejects_name_owned_by_other_collection() {
        let conn = conn();
        IndexManager::create_index(&conn, def("users_a", "b", false)).unwrap();

        let err = IndexManager::create_index(&conn, def("users", "a_b", false)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        let kept = IndexManager::get_index(&conn, "idx_users_a_b").unwrap().unwrap();
        assert_eq!(kept.collection, "users_a");
        assert_eq!(kept.fields, vec!["b".to_string()]);
    }
}
