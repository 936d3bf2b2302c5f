// src/bulk.rs
// Bulk writes: validate everything, then write in fixed-size batches inside one transaction

use ahash::AHashMap;
use rusqlite::Connection;
use serde_json::{Map, Value};
use tracing::{debug, trace};

use crate::database::DatabaseShared;
use crate::document::{new_document_id, type_name, Document, DocumentId};
use crate::error::{DocLiteError, Result};
use crate::events::StoreEvent;
use crate::executor;
use crate::path::{merge_patch, set_path, unset_path, validate_field_path, validate_name, ID_FIELD};
use crate::query::Filter;
use crate::storage::{io, metadata};
use crate::transaction::write_transaction;
use crate::validation::validate_all;

/// Parsed `$set` / `$unset` update document.
///
/// A mapping without any `$`-prefixed key is shorthand for `$set`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateSpec {
    pub set: Vec<(String, Value)>,
    pub unset: Vec<String>,
}

impl UpdateSpec {
    pub fn parse(update: &Value) -> Result<Self> {
        let Value::Object(ops) = update else {
            return Err(DocLiteError::Plan(format!(
                "update must be a mapping, got {}",
                type_name(update)
            )));
        };

        let operator_keys = ops.keys().filter(|k| k.starts_with('$')).count();
        if operator_keys == 0 {
            return Self::from_set(ops);
        }
        if operator_keys != ops.len() {
            return Err(DocLiteError::Plan(
                "update mixes operators with plain fields".to_string(),
            ));
        }

        let mut spec = UpdateSpec::default();
        for (op, fields) in ops {
            let Value::Object(fields) = fields else {
                return Err(DocLiteError::Plan(format!("{} expects a mapping", op)));
            };
            match op.as_str() {
                "$set" => spec.set.extend(Self::from_set(fields)?.set),
                "$unset" => {
                    for field in fields.keys() {
                        Self::check_target(field)?;
                        spec.unset.push(field.clone());
                    }
                }
                other => {
                    return Err(DocLiteError::Plan(format!(
                        "Unsupported update operator: {}",
                        other
                    )))
                }
            }
        }
        Ok(spec)
    }

    fn from_set(fields: &Map<String, Value>) -> Result<Self> {
        let mut set = Vec::with_capacity(fields.len());
        for (field, value) in fields {
            Self::check_target(field)?;
            set.push((field.clone(), value.clone()));
        }
        Ok(UpdateSpec { set, unset: Vec::new() })
    }

    fn check_target(field: &str) -> Result<()> {
        validate_field_path(field)?;
        if field == ID_FIELD || field.starts_with("_id.") {
            return Err(DocLiteError::Plan("the _id field cannot be modified".to_string()));
        }
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.unset.is_empty()
    }

    /// Apply to a payload: all `$set` paths first, then `$unset`.
    pub fn apply(&self, payload: &mut Value) -> Result<()> {
        for (path, value) in &self.set {
            set_path(payload, path, value.clone())?;
        }
        for path in &self.unset {
            unset_path(payload, path);
        }
        Ok(())
    }
}

/// Batched writes against one store
pub struct BulkOperations<'db> {
    shared: &'db DatabaseShared,
}

impl<'db> BulkOperations<'db> {
    pub(crate) fn new(shared: &'db DatabaseShared) -> Self {
        BulkOperations { shared }
    }

    /// Insert every document or none of them.
    ///
    /// `ids`, when given, must pair one identifier with each document; otherwise fresh
    /// identifiers are generated. Returns the identifiers in document order.
    pub fn bulk_insert(
        &self,
        collection: &str,
        documents: Vec<Value>,
        ids: Option<Vec<String>>,
    ) -> Result<Vec<DocumentId>> {
        validate_name("collection", collection)?;
        let ids = match ids {
            Some(ids) if ids.len() != documents.len() => {
                return Err(DocLiteError::Validation(format!(
                    "got {} ids for {} documents",
                    ids.len(),
                    documents.len()
                )))
            }
            Some(ids) => ids,
            None => documents.iter().map(|_| new_document_id()).collect(),
        };
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let docs = documents
            .into_iter()
            .zip(ids)
            .map(|(payload, id)| Document::new(id, collection, payload))
            .collect::<Result<Vec<_>>>()?;
        let batch_size = self.shared.pool.config().write_batch_size;

        let inserted = write_transaction(&self.shared.pool, |conn| {
            metadata::ensure_collection(conn, collection)?;
            let validator = self.shared.collection_validator(conn, collection)?;
            let payloads: Vec<Value> = docs.iter().map(|d| Value::Object(d.payload.clone())).collect();
            validate_all(validator.as_ref(), collection, &payloads)?;

            for (n, chunk) in docs.chunks(batch_size).enumerate() {
                for doc in chunk {
                    io::insert_document(conn, doc)?;
                }
                trace!("Inserted batch {} ({} documents) into {}", n, chunk.len(), collection);
            }
            Ok(docs.iter().map(|d| d.id.clone()).collect::<Vec<_>>())
        })?;

        debug!("Bulk inserted {} documents into {}", inserted.len(), collection);
        self.notify(|| StoreEvent::inserted(collection, inserted.clone()));
        Ok(inserted)
    }

    /// Merge-patch stored documents. Each patch carries the target `_id`; identifiers not
    /// present in the collection are skipped. Returns how many documents were updated.
    pub fn bulk_update(&self, collection: &str, patches: Vec<Value>) -> Result<usize> {
        validate_name("collection", collection)?;
        let mut targets = Vec::with_capacity(patches.len());
        for (position, mut patch) in patches.into_iter().enumerate() {
            let id = match patch.as_object_mut().and_then(|map| map.remove(ID_FIELD)) {
                Some(Value::String(id)) => id,
                _ => {
                    return Err(DocLiteError::Validation(format!(
                        "patch at position {} has no string _id",
                        position
                    )))
                }
            };
            targets.push((id, patch));
        }
        if targets.is_empty() {
            return Ok(0);
        }
        let batch_size = self.shared.pool.config().write_batch_size;

        let updated = write_transaction(&self.shared.pool, |conn| {
            let validator = self.shared.collection_validator(conn, collection)?;

            // Later patches for the same id apply on top of earlier ones
            let mut positions: AHashMap<String, usize> = AHashMap::new();
            let mut pending: Vec<(String, Value)> = Vec::new();
            for (id, patch) in &targets {
                let existing = positions.get(id).copied();
                let slot = match existing {
                    Some(at) => &mut pending[at].1,
                    None => match io::fetch_document(conn, collection, id)? {
                        Some(doc) => {
                            positions.insert(id.clone(), pending.len());
                            pending.push((id.clone(), doc.into_value()));
                            let last = pending.len() - 1;
                            &mut pending[last].1
                        }
                        None => {
                            trace!("Skipping patch for missing document {} in {}", id, collection);
                            continue;
                        }
                    },
                };
                merge_patch(slot, patch);
                if let Value::Object(map) = slot {
                    map.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                }
            }

            validate_all(validator.as_ref(), collection, pending.iter().map(|(_, payload)| payload))?;
            write_payloads(conn, collection, pending, batch_size)
        })?;

        debug!("Bulk updated {} documents in {}", updated.len(), collection);
        let count = updated.len();
        if count > 0 {
            self.notify(|| StoreEvent::updated(collection, updated));
        }
        Ok(count)
    }

    /// Delete by identifier within `collection`. Returns how many documents were removed.
    pub fn bulk_delete(&self, collection: &str, ids: &[String]) -> Result<usize> {
        validate_name("collection", collection)?;
        if ids.is_empty() {
            return Ok(0);
        }
        let batch_size = self.shared.pool.config().write_batch_size;

        let deleted = write_transaction(&self.shared.pool, |conn| {
            let mut deleted = Vec::new();
            for chunk in ids.chunks(batch_size) {
                for id in chunk {
                    if io::delete_document(conn, collection, id)? {
                        deleted.push(id.clone());
                    }
                }
            }
            Ok(deleted)
        })?;

        debug!("Bulk deleted {} of {} documents from {}", deleted.len(), ids.len(), collection);
        let count = deleted.len();
        if count > 0 {
            self.notify(|| StoreEvent::deleted(collection, deleted));
        }
        Ok(count)
    }

    /// Apply `update` to every document matching `filter`. Returns how many were updated.
    pub fn update_where(&self, collection: &str, filter: &Filter, update: &Value) -> Result<usize> {
        validate_name("collection", collection)?;
        let spec = UpdateSpec::parse(update)?;
        if spec.is_empty() {
            return Ok(0);
        }
        let config = self.shared.pool.config();
        let (fetch_batch, write_batch) = (config.fetch_batch_size, config.write_batch_size);

        let updated = write_transaction(&self.shared.pool, |conn| {
            let validator = self.shared.collection_validator(conn, collection)?;

            let mut pending = Vec::new();
            executor::find_filter(conn, collection, filter, None, fetch_batch, |batch| {
                for mut payload in batch {
                    let id = stored_id(&payload)?;
                    spec.apply(&mut payload)?;
                    pending.push((id, payload));
                }
                Ok(())
            })?;

            validate_all(validator.as_ref(), collection, pending.iter().map(|(_, payload)| payload))?;
            write_payloads(conn, collection, pending, write_batch)
        })?;

        debug!("Updated {} documents in {}", updated.len(), collection);
        let count = updated.len();
        if count > 0 {
            self.notify(|| StoreEvent::updated(collection, updated));
        }
        Ok(count)
    }

    /// Delete every document matching `filter`. Returns how many were removed.
    pub fn delete_where(&self, collection: &str, filter: &Filter) -> Result<usize> {
        validate_name("collection", collection)?;
        let fetch_batch = self.shared.pool.config().fetch_batch_size;

        let deleted = write_transaction(&self.shared.pool, |conn| {
            let mut ids = Vec::new();
            executor::find_filter(conn, collection, filter, None, fetch_batch, |batch| {
                for payload in &batch {
                    ids.push(stored_id(payload)?);
                }
                Ok(())
            })?;

            let mut deleted = Vec::with_capacity(ids.len());
            for id in ids {
                if io::delete_document(conn, collection, &id)? {
                    deleted.push(id);
                }
            }
            Ok(deleted)
        })?;

        debug!("Deleted {} documents from {}", deleted.len(), collection);
        let count = deleted.len();
        if count > 0 {
            self.notify(|| StoreEvent::deleted(collection, deleted));
        }
        Ok(count)
    }

    fn notify<F: FnOnce() -> StoreEvent>(&self, event: F) {
        if self.shared.events.has_subscribers() {
            self.shared.events.emit(event());
        }
    }
}

fn stored_id(payload: &Value) -> Result<String> {
    payload
        .get(ID_FIELD)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| DocLiteError::Engine("stored document has no string _id".to_string()))
}

/// Rewrites each payload in place; returns the ids whose rows were actually changed.
fn write_payloads(
    conn: &Connection,
    collection: &str,
    pending: Vec<(String, Value)>,
    batch_size: usize,
) -> Result<Vec<String>> {
    let mut written = Vec::with_capacity(pending.len());
    for (n, chunk) in pending.chunks(batch_size).enumerate() {
        for (id, payload) in chunk {
            if io::replace_document(conn, collection, id, payload)? {
                written.push(id.clone());
            }
        }
        trace!("Rewrote batch {} ({} documents) in {}", n, chunk.len(), collection);
    }
    Ok(written)
}

impl std::fmt::Debug for BulkOperations<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkOperations")
            .field("path", &self.shared.pool.path())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::error::ErrorKind;
    use crate::query::Query;
    use serde_json::json;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Database {
        Database::open(dir.path().join("bulk.db")).unwrap()
    }

    #[test]
    fn test_update_spec_parse() {
        let spec = UpdateSpec::parse(&json!({"age": 3})).unwrap();
        assert_eq!(spec.set, vec![("age".to_string(), json!(3))]);

        let spec = UpdateSpec::parse(&json!({"$set": {"a.b": 1}, "$unset": {"c": ""}})).unwrap();
        assert_eq!(spec.set.len(), 1);
        assert_eq!(spec.unset, vec!["c".to_string()]);

        for bad in [
            json!({"$inc": {"a": 1}}),
            json!({"$set": {"a": 1}, "b": 2}),
            json!({"$set": {"_id": "x"}}),
            json!({"$set": 5}),
            json!([1]),
        ] {
            assert_eq!(UpdateSpec::parse(&bad).unwrap_err().kind(), ErrorKind::Plan, "{}", bad);
        }
    }

    #[test]
    fn test_update_spec_apply_nested() {
        let mut doc = json!({"tags": ["a", "b"]});
        UpdateSpec::parse(&json!({"a.b": 1, "tags.1": "z"})).unwrap().apply(&mut doc).unwrap();
        assert_eq!(doc, json!({"tags": ["a", "z"], "a": {"b": 1}}));
    }

    #[test]
    fn test_bulk_insert_with_ids() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let bulk = db.bulk_operations();

        let ids = bulk
            .bulk_insert("users", vec![json!({"n": 1}), json!({"n": 2})], Some(vec!["a".into(), "b".into()]))
            .unwrap();
        assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);

        let err = bulk
            .bulk_insert("users", vec![json!({"n": 3})], Some(vec![]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(db.collection("users").unwrap().count_all().unwrap(), 2);
    }

    #[test]
    fn test_bulk_insert_duplicate_rolls_back() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let bulk = db.bulk_operations();

        let err = bulk
            .bulk_insert("users", vec![json!({}), json!({})], Some(vec!["x".into(), "x".into()]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(db.collection("users").unwrap().count_all().unwrap(), 0);
    }

    #[test]
    fn test_bulk_update_merges_and_skips_missing() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let bulk = db.bulk_operations();
        bulk.bulk_insert("users", vec![json!({"p": {"a": 1, "b": 2}})], Some(vec!["u1".into()]))
            .unwrap();

        let updated = bulk
            .bulk_update(
                "users",
                vec![
                    json!({"_id": "u1", "p": {"b": null, "c": 3}}),
                    json!({"_id": "ghost", "x": 1}),
                    json!({"_id": "u1", "q": true}),
                ],
            )
            .unwrap();
        assert_eq!(updated, 1);

        let doc = db.collection("users").unwrap().get("u1").unwrap().unwrap();
        assert_eq!(doc, json!({"p": {"a": 1, "c": 3}, "_id": "u1", "q": true}));

        let err = bulk.bulk_update("users", vec![json!({"x": 1})]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_bulk_delete_counts_removed() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let bulk = db.bulk_operations();
        let ids = bulk.bulk_insert("users", vec![json!({}), json!({})], None).unwrap();

        let mut targets = ids.clone();
        targets.push("missing".into());
        assert_eq!(bulk.bulk_delete("users", &targets).unwrap(), 2);
        assert_eq!(bulk.bulk_delete("users", &ids).unwrap(), 0);
    }

    #[test]
    fn test_update_and_delete_where() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let bulk = db.bulk_operations();
        bulk.bulk_insert(
            "users",
            vec![json!({"age": 20}), json!({"age": 30}), json!({"age": 40})],
            None,
        )
        .unwrap();

        let older = Filter::Conditions(Query::from_json(&json!({"age": {"$gte": 30}})).unwrap());
        assert_eq!(bulk.update_where("users", &older, &json!({"$set": {"senior": true}})).unwrap(), 2);

        let seniors = Filter::Conditions(Query::from_json(&json!({"senior": true})).unwrap());
        assert_eq!(bulk.delete_where("users", &seniors).unwrap(), 2);
        assert_eq!(db.collection("users").unwrap().count_all().unwrap(), 1);
    }

    #[test]
    fn test_bulk_methods_reject_unsafe_collection_names() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let bulk = db.bulk_operations();
        bulk.bulk_insert("secret", vec![json!({"n": 1}), json!({"n": 2})], None)
            .unwrap();

        let name = "nope' OR collection = 'secret";
        let all = Filter::Conditions(Query::new());
        let errors = [
            bulk.bulk_insert(name, vec![json!({"n": 3})], None).unwrap_err(),
            bulk.bulk_update(name, vec![json!({"_id": "a", "x": 1})]).unwrap_err(),
            bulk.bulk_delete(name, &["a".to_string()]).unwrap_err(),
            bulk.update_where(name, &all, &json!({"$set": {"x": 1}})).unwrap_err(),
            bulk.delete_where(name, &all).unwrap_err(),
        ];
        for err in errors {
            assert_eq!(err.kind(), ErrorKind::Plan);
        }

        assert_eq!(db.list_collections().unwrap(), vec!["secret".to_string()]);
        let secret = db.collection("secret").unwrap();
        assert_eq!(secret.count_all().unwrap(), 2);
        assert_eq!(secret.count(json!({"x": 1})).unwrap(), 0);
    }

    #[test]
    fn test_update_where_counts_only_rewritten_rows() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let bulk = db.bulk_operations();
        bulk.bulk_insert("users", vec![json!({"n": 1})], None).unwrap();
        bulk.bulk_insert("other", vec![json!({"n": 1})], None).unwrap();

        let all = Filter::Conditions(Query::new());
        assert_eq!(bulk.update_where("users", &all, &json!({"$set": {"x": 1}})).unwrap(), 1);
        assert_eq!(db.collection("other").unwrap().count(json!({"x": 1})).unwrap(), 0);
    }
}
