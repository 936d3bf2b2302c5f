// doclite-core/src/collection_core.rs
// Collection handle: reads, writes and index declarations scoped to one collection

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::{debug, info};

use crate::aggregation::Pipeline;
use crate::bulk::BulkOperations;
use crate::database::DatabaseShared;
use crate::document::{DocumentId, DocumentMeta};
use crate::error::{DocLiteError, Result};
use crate::executor::{self, Projection, SelectSpec};
use crate::find_options::{apply_limit_skip, apply_sort, FindOptions};
use crate::index::{IndexDefinition, IndexFields, IndexManager};
use crate::query::{Filter, IntoFilter, Query};
use crate::query_planner::QueryPlanner;
use crate::storage::{io, metadata};
use crate::transaction::{read, write_transaction};

/// A named partition of documents.
///
/// Handles are cheap to clone and share the store they were obtained from.
#[derive(Clone)]
pub struct Collection {
    name: String,
    shared: Arc<DatabaseShared>,
}

impl Collection {
    pub(crate) fn new(name: String, shared: Arc<DatabaseShared>) -> Self {
        Collection { name, shared }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // ========== VALIDATION ==========

    /// Attach a registered validator by name. Only the name is persisted.
    pub fn set_validator(&self, validator: &str) -> Result<()> {
        if !self.shared.validators.contains(validator) {
            return Err(DocLiteError::Validation(format!(
                "validator '{}' is not registered",
                validator
            )));
        }
        self.update_metadata(|meta| meta.validator = Some(validator.to_string()))?;
        info!("Validator {} attached to {}", validator, self.name);
        Ok(())
    }

    pub fn clear_validator(&self) -> Result<()> {
        self.update_metadata(|meta| meta.validator = None)
    }

    pub fn validator_name(&self) -> Result<Option<String>> {
        let meta = read(&self.shared.pool, |conn| metadata::load_metadata(conn, &self.name))?;
        Ok(meta.and_then(|m| m.validator))
    }

    fn update_metadata<F: FnOnce(&mut metadata::CollectionMetadata)>(&self, f: F) -> Result<()> {
        write_transaction(&self.shared.pool, |conn| {
            let mut meta = metadata::load_metadata(conn, &self.name)?.unwrap_or_default();
            f(&mut meta);
            metadata::save_metadata(conn, &self.name, &meta)
        })
    }

    // ========== WRITES ==========

    /// Insert one document under a generated identifier
    pub fn insert(&self, document: Value) -> Result<DocumentId> {
        self.insert_one(document, None)
    }

    pub fn insert_with_id(&self, document: Value, id: &str) -> Result<DocumentId> {
        self.insert_one(document, Some(id.to_string()))
    }

    fn insert_one(&self, document: Value, id: Option<String>) -> Result<DocumentId> {
        let ids = self
            .bulk_operations()
            .bulk_insert(&self.name, vec![document], id.map(|id| vec![id]))?;
        ids.into_iter()
            .next()
            .ok_or_else(|| DocLiteError::Engine("insert returned no identifier".to_string()))
    }

    pub fn insert_many(&self, documents: Vec<Value>) -> Result<Vec<DocumentId>> {
        self.bulk_operations().bulk_insert(&self.name, documents, None)
    }

    /// `$set` / `$unset` every matching document. Returns how many were updated.
    pub fn update<F: IntoFilter>(&self, filter: F, update: &Value) -> Result<usize> {
        let filter = filter.into_filter()?;
        self.bulk_operations().update_where(&self.name, &filter, update)
    }

    pub fn delete<F: IntoFilter>(&self, filter: F) -> Result<usize> {
        let filter = filter.into_filter()?;
        self.bulk_operations().delete_where(&self.name, &filter)
    }

    /// Delete by identifier
    pub fn delete_many(&self, ids: &[String]) -> Result<usize> {
        self.bulk_operations().bulk_delete(&self.name, ids)
    }

    pub fn delete_all(&self) -> Result<usize> {
        self.delete(Filter::Conditions(Query::new()))
    }

    pub fn bulk_operations(&self) -> BulkOperations<'_> {
        BulkOperations::new(&self.shared)
    }

    // ========== READS ==========

    /// Documents matching `filter`, capped at the configured result limit unless the
    /// query carries its own.
    pub fn find<F: IntoFilter>(&self, filter: F) -> Result<Vec<Value>> {
        let filter = filter.into_filter()?;
        let mut out = Vec::new();
        self.visit(&filter, |batch| {
            out.extend(batch);
            Ok(())
        })?;
        Ok(out)
    }

    /// Find with sort, limit and skip
    pub fn find_with_options<F: IntoFilter>(&self, filter: F, options: &FindOptions) -> Result<Vec<Value>> {
        match filter.into_filter()? {
            Filter::Conditions(query) => self.find(options.apply_to(query)),
            Filter::FullText(term) => {
                // Whole-document matches come back in storage order; order them here
                let max_results = self.shared.pool.config().max_results;
                let mut docs = self.read_filter(&Filter::FullText(term), None)?;
                apply_sort(&mut docs, &options.sort);
                let limit = Some(options.limit.unwrap_or(max_results));
                Ok(apply_limit_skip(docs, limit, options.skip))
            }
        }
    }

    pub fn find_one<F: IntoFilter>(&self, filter: F) -> Result<Option<Value>> {
        let docs = match filter.into_filter()? {
            Filter::Conditions(query) => self.find(query.limit(1))?,
            full_text => self.read_filter(&full_text, Some(1))?,
        };
        Ok(docs.into_iter().next())
    }

    /// Stream matching documents to `visitor` in batches of the configured fetch size.
    /// Returns the number of documents delivered.
    pub fn find_batches<F, V>(&self, filter: F, visitor: V) -> Result<usize>
    where
        F: IntoFilter,
        V: FnMut(Vec<Value>) -> Result<()>,
    {
        let filter = filter.into_filter()?;
        self.visit(&filter, visitor)
    }

    fn visit<V>(&self, filter: &Filter, visitor: V) -> Result<usize>
    where
        V: FnMut(Vec<Value>) -> Result<()>,
    {
        let config = self.shared.pool.config();
        let (max_results, batch_size) = (config.max_results, config.fetch_batch_size);
        read(&self.shared.pool, |conn| {
            executor::find_filter(conn, &self.name, filter, Some(max_results), batch_size, visitor)
        })
    }

    fn read_filter(&self, filter: &Filter, limit: Option<usize>) -> Result<Vec<Value>> {
        let batch_size = self.shared.pool.config().fetch_batch_size;
        let mut out = Vec::new();
        read(&self.shared.pool, |conn| {
            executor::find_filter(conn, &self.name, filter, limit, batch_size, |batch| {
                out.extend(batch);
                Ok(())
            })
        })?;
        Ok(out)
    }

    /// Fetch by identifier
    pub fn get(&self, id: &str) -> Result<Option<Value>> {
        let doc = read(&self.shared.pool, |conn| io::fetch_document(conn, &self.name, id))?;
        Ok(doc.map(|d| d.into_value()))
    }

    /// Engine-maintained timestamps for a document
    pub fn get_meta(&self, id: &str) -> Result<Option<DocumentMeta>> {
        read(&self.shared.pool, |conn| io::fetch_meta(conn, &self.name, id))
    }

    /// Every document, optionally sorted and paged
    pub fn all(&self, options: &FindOptions) -> Result<Vec<Value>> {
        self.find(options.apply_to(Query::new()))
    }

    /// Number of matching documents. Limits and skips on the query are ignored.
    pub fn count<F: IntoFilter>(&self, filter: F) -> Result<u64> {
        match filter.into_filter()? {
            Filter::Conditions(query) => read(&self.shared.pool, |conn| {
                let indexes = IndexManager::list_indexes(conn, Some(&self.name))?;
                let plan = QueryPlanner::plan(&query.conditions, &indexes);
                executor::count(conn, &self.name, &plan)
            }),
            full_text => Ok(self.read_filter(&full_text, None)?.len() as u64),
        }
    }

    pub fn count_all(&self) -> Result<u64> {
        read(&self.shared.pool, |conn| io::count_documents(conn, &self.name))
    }

    // ========== AGGREGATION ==========

    /// Run a JSON pipeline: `[{"group": {"field", "function", "target", "alias"}}, ...]`
    pub fn aggregate(&self, pipeline_json: &Value) -> Result<Vec<Value>> {
        let pipeline = Pipeline::from_json(pipeline_json)?;
        self.aggregate_pipeline(&pipeline)
    }

    pub fn aggregate_pipeline(&self, pipeline: &Pipeline) -> Result<Vec<Value>> {
        let batch_size = self.shared.pool.config().fetch_batch_size;
        read(&self.shared.pool, |conn| {
            let indexes = IndexManager::list_indexes(conn, Some(&self.name))?;
            pipeline.execute(conn, &self.name, &indexes, batch_size)
        })
    }

    // ========== INDEXES ==========

    /// Create (or refresh) an index over one field or an ordered field list.
    /// Returns the derived index name.
    pub fn create_index<I: IndexFields>(&self, fields: I, unique: bool) -> Result<String> {
        let definition = self.shared.create_index(&self.name, fields.into_fields(), unique)?;
        Ok(definition.name)
    }

    pub fn list_indexes(&self) -> Result<Vec<IndexDefinition>> {
        read(&self.shared.pool, |conn| IndexManager::list_indexes(conn, Some(&self.name)))
    }

    // ========== QUERY OPTIMIZATION ==========

    /// Describe how `filter` would run: the planner's choice, the generated SQL and the
    /// engine's own plan lines.
    pub fn explain<F: IntoFilter>(&self, filter: F) -> Result<Value> {
        let query = match filter.into_filter()? {
            Filter::Conditions(query) => query,
            Filter::FullText(term) => {
                return Ok(json!({
                    "queryPlan": "FullTextScan",
                    "indexUsed": null,
                    "stage": "FULL_SCAN",
                    "term": term,
                }))
            }
        };

        let max_results = self.shared.pool.config().max_results;
        read(&self.shared.pool, |conn| {
            let indexes = IndexManager::list_indexes(conn, Some(&self.name))?;
            let plan = QueryPlanner::plan(&query.conditions, &indexes);
            let spec = SelectSpec {
                collection: &self.name,
                plan: &plan,
                sort: &query.sort,
                limit: query.limit.or(Some(max_results)),
                skip: query.skip,
                projection: Projection::Documents,
            };
            let (sql, details) = executor::explain_rows(conn, &spec)?;
            debug!("Explained query on {}: {:?}", self.name, plan.access);

            let mut explained = QueryPlanner::explain(&plan, &indexes);
            if let Value::Object(map) = &mut explained {
                map.insert("sql".to_string(), Value::String(sql));
                map.insert("engineDetails".to_string(), json!(details));
            }
            Ok(explained)
        })
    }
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use crate::database::Database;
    use crate::error::ErrorKind;
    use crate::find_options::FindOptions;
    use crate::query_builder::field;
    use serde_json::{json, Value};
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> Database {
        Database::open(dir.path().join("collection.db")).unwrap()
    }

    #[test]
    fn test_insert_and_get() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let users = db.collection("users").unwrap();

        let id = users.insert(json!({"name": "Alice", "age": 30})).unwrap();
        let doc = users.get(&id).unwrap().unwrap();
        assert_eq!(doc, json!({"name": "Alice", "age": 30, "_id": id}));

        let id = users.insert_with_id(json!({"name": "Bob"}), "bob").unwrap();
        assert_eq!(id, "bob");
        assert_eq!(users.count_all().unwrap(), 2);
    }

    #[test]
    fn test_find_variants() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let users = db.collection("users").unwrap();
        users
            .insert_many(vec![
                json!({"name": "A", "age": 20}),
                json!({"name": "B", "age": 30}),
                json!({"name": "C", "age": 40}),
            ])
            .unwrap();

        assert_eq!(users.find(json!({"age": {"$gt": 25}})).unwrap().len(), 2);
        assert_eq!(users.find(field("age").gte(30) & field("age").lt(40)).unwrap().len(), 1);
        assert!(users.find_one(json!({"name": "Z"})).unwrap().is_none());

        let options = FindOptions::new().with_sort_str("age", "desc").unwrap().with_limit(2);
        let docs = users.find_with_options(json!({}), &options).unwrap();
        let ages: Vec<&Value> = docs.iter().map(|d| &d["age"]).collect();
        assert_eq!(ages, vec![&json!(40), &json!(30)]);

        assert_eq!(users.all(&FindOptions::new().with_skip(1)).unwrap().len(), 2);
        assert_eq!(users.count(json!({"age": {"$in": [20, 40]}})).unwrap(), 2);
    }

    #[test]
    fn test_full_text_find_with_options() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let posts = db.collection("posts").unwrap();
        posts
            .insert_many(vec![
                json!({"rank": 2, "body": "Tech news"}),
                json!({"rank": 1, "meta": {"tags": ["tech"]}}),
                json!({"rank": 3, "body": "gardening"}),
            ])
            .unwrap();

        let filter = json!({"*": {"$contains": "TECH"}});
        let options = FindOptions::new().with_sort_str("rank", "asc").unwrap();
        let docs = posts.find_with_options(&filter, &options).unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["rank"], 1);
        assert_eq!(posts.count(&filter).unwrap(), 2);
        assert!(posts.find_one(&filter).unwrap().is_some());
    }

    #[test]
    fn test_validator_lifecycle() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let users = db.collection("users").unwrap();

        assert_eq!(users.set_validator("named").unwrap_err().kind(), ErrorKind::Validation);

        db.register_validator("named", |doc: &Value| doc.get("name").is_some()).unwrap();
        users.set_validator("named").unwrap();
        assert_eq!(users.validator_name().unwrap(), Some("named".to_string()));

        let err = users.insert(json!({"age": 3})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        let id = users.insert(json!({"name": "ok"})).unwrap();
        let err = users.update(json!({"_id": id}), &json!({"$unset": {"name": ""}})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        users.clear_validator().unwrap();
        assert!(users.insert(json!({"age": 3})).is_ok());
    }

    #[test]
    fn test_unregistered_persisted_validator_blocks_writes() {
        let dir = TempDir::new().unwrap();
        {
            let db = open(&dir);
            db.register_validator("strict", |_: &Value| true).unwrap();
            db.collection("users").unwrap().set_validator("strict").unwrap();
        }

        let db = open(&dir);
        let users = db.collection("users").unwrap();
        let err = users.insert(json!({})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);

        db.register_validator("strict", |_: &Value| true).unwrap();
        assert!(users.insert(json!({})).is_ok());
    }

    #[test]
    fn test_delete_variants() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let users = db.collection("users").unwrap();
        let ids = users
            .insert_many(vec![json!({"k": 1}), json!({"k": 2}), json!({"k": 3})])
            .unwrap();

        assert_eq!(users.delete(json!({"k": 1})).unwrap(), 1);
        assert_eq!(users.delete_many(&ids[1..2]).unwrap(), 1);
        assert_eq!(users.delete_all().unwrap(), 1);
        assert_eq!(users.count_all().unwrap(), 0);
    }

    #[test]
    fn test_create_index_and_explain() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let users = db.collection("users").unwrap();
        users.insert(json!({"age": 30, "city": "NYC"})).unwrap();

        let name = users.create_index(["age", "city"], false).unwrap();
        assert_eq!(name, "idx_users_age_city");
        assert_eq!(users.list_indexes().unwrap().len(), 1);

        let explained = users.explain(json!({"age": 30})).unwrap();
        assert_eq!(explained["indexUsed"], "idx_users_age_city");
        assert!(explained["sql"].as_str().unwrap().contains("INDEXED BY"));
        assert!(explained["engineDetails"].is_array());

        let explained = users.explain(json!({"*": {"$contains": "x"}})).unwrap();
        assert_eq!(explained["queryPlan"], "FullTextScan");
    }

    #[test]
    fn test_aggregate() {
        let dir = TempDir::new().unwrap();
        let db = open(&dir);
        let users = db.collection("users").unwrap();
        users
            .insert_many(vec![json!({"c": "a", "n": 1}), json!({"c": "a", "n": 3}), json!({"c": "b"})])
            .unwrap();

        let rows = users
            .aggregate(&json!([{"group": {"field": "c", "function": "SUM", "target": "n", "alias": "total"}}]))
            .unwrap();
        assert_eq!(rows, vec![json!({"c": "a", "total": 4})]);
    }
}
