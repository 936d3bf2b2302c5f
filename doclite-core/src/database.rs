// doclite-core/src/database.rs
// Store handle: connection pool, validator registry and event bus shared by every collection

use std::path::Path;
use std::sync::Arc;

use rusqlite::Connection;
use serde_json::Value;
use tracing::{debug, info};

use crate::bulk::BulkOperations;
use crate::collection_core::Collection;
use crate::config::Config;
use crate::document::DocumentId;
use crate::error::{DocLiteError, Result};
use crate::events::{EventBus, StoreEvent};
use crate::executor;
use crate::index::{IndexDefinition, IndexFields, IndexManager};
use crate::path::validate_name;
use crate::pool::{ConnectionPool, PoolStatus};
use crate::query::{Filter, IntoFilter, Query};
use crate::storage::metadata;
use crate::transaction::{read, write_transaction};
use crate::validation::{Validator, ValidatorRegistry};

pub(crate) struct DatabaseShared {
    pub(crate) pool: ConnectionPool,
    pub(crate) validators: ValidatorRegistry,
    pub(crate) events: EventBus,
}

impl DatabaseShared {
    /// The registered implementation of the collection's persisted validator, if any
    pub(crate) fn collection_validator(
        &self,
        conn: &Connection,
        collection: &str,
    ) -> Result<Option<Arc<dyn Validator>>> {
        let meta = metadata::load_metadata(conn, collection)?;
        let name = meta.as_ref().and_then(|m| m.validator.as_deref());
        self.validators.resolve(name)
    }

    pub(crate) fn create_index(
        &self,
        collection: &str,
        fields: Vec<String>,
        unique: bool,
    ) -> Result<IndexDefinition> {
        validate_name("collection", collection)?;
        let definition = IndexDefinition::new(collection, fields, unique)?;
        write_transaction(&self.pool, |conn| IndexManager::create_index(conn, definition))
    }
}

/// Embedded document store over one SQLite file.
///
/// Cloning is cheap; clones share the same pool.
#[derive(Clone)]
pub struct Database {
    shared: Arc<DatabaseShared>,
}

impl Database {
    /// Open or create a store with the default configuration
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_config(path, Config::default())
    }

    pub fn open_with_config<P: AsRef<Path>>(path: P, config: Config) -> Result<Self> {
        let pool = ConnectionPool::open(path.as_ref(), config)?;
        info!("Opened store at {}", path.as_ref().display());
        Ok(Database {
            shared: Arc::new(DatabaseShared {
                pool,
                validators: ValidatorRegistry::new(),
                events: EventBus::new(),
            }),
        })
    }

    pub fn config(&self) -> &Config {
        self.shared.pool.config()
    }

    pub fn path(&self) -> &Path {
        self.shared.pool.path()
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.shared.pool.status()
    }

    // ========== COLLECTIONS ==========

    /// Get a collection, creating it on first reference
    pub fn collection(&self, name: &str) -> Result<Collection> {
        validate_name("collection", name)?;
        let created = write_transaction(&self.shared.pool, |conn| metadata::ensure_collection(conn, name))?;
        if created {
            debug!("Created collection {}", name);
        }
        Ok(Collection::new(name.to_string(), Arc::clone(&self.shared)))
    }

    pub fn list_collections(&self) -> Result<Vec<String>> {
        read(&self.shared.pool, metadata::list_collections)
    }

    pub fn count_collections(&self) -> Result<usize> {
        Ok(self.list_collections()?.len())
    }

    /// Remove a collection with all of its documents and index definitions.
    /// Returns the number of documents removed.
    pub fn drop_collection(&self, name: &str) -> Result<usize> {
        validate_name("collection", name)?;
        let (removed, indexes) = write_transaction(&self.shared.pool, |conn| {
            let indexes = IndexManager::drop_collection_indexes(conn, name)?;
            let removed = metadata::drop_collection_rows(conn, name)?;
            Ok((removed, indexes))
        })?;

        info!("Dropped collection {} ({} documents, {} indexes)", name, removed, indexes);
        if self.shared.events.has_subscribers() {
            self.shared.events.emit(StoreEvent::collection_dropped(name));
        }
        Ok(removed)
    }

    /// Drop every collection. Returns how many were dropped.
    pub fn drop_all_collections(&self) -> Result<usize> {
        let names = self.list_collections()?;
        for name in &names {
            self.drop_collection(name)?;
        }
        Ok(names.len())
    }

    // ========== INDEXES ==========

    pub fn create_index<I: IndexFields>(&self, collection: &str, fields: I, unique: bool) -> Result<String> {
        let definition = self.shared.create_index(collection, fields.into_fields(), unique)?;
        Ok(definition.name)
    }

    pub fn list_indexes(&self, collection: Option<&str>) -> Result<Vec<IndexDefinition>> {
        read(&self.shared.pool, |conn| IndexManager::list_indexes(conn, collection))
    }

    /// Drop an index by name. Unknown names are a no-op returning `false`.
    pub fn drop_index(&self, name: &str) -> Result<bool> {
        write_transaction(&self.shared.pool, |conn| IndexManager::drop_index(conn, name))
    }

    // ========== DOCUMENTS ==========

    pub fn insert(&self, collection: &str, document: Value, id: Option<&str>) -> Result<DocumentId> {
        let collection = self.collection(collection)?;
        match id {
            Some(id) => collection.insert_with_id(document, id),
            None => collection.insert(document),
        }
    }

    pub fn update<F: IntoFilter>(&self, collection: &str, filter: F, update: &Value) -> Result<usize> {
        validate_name("collection", collection)?;
        let filter = filter.into_filter()?;
        self.bulk_operations().update_where(collection, &filter, update)
    }

    pub fn delete<F: IntoFilter>(&self, collection: &str, filter: F) -> Result<usize> {
        validate_name("collection", collection)?;
        let filter = filter.into_filter()?;
        self.bulk_operations().delete_where(collection, &filter)
    }

    /// Run a query that names its own collection
    pub fn execute_query(&self, query: &Query) -> Result<Vec<Value>> {
        let collection = query
            .collection
            .as_deref()
            .ok_or_else(|| DocLiteError::Plan("query has no target collection".to_string()))?;
        validate_name("collection", collection)?;

        let config = self.config();
        let (max_results, batch_size) = (config.max_results, config.fetch_batch_size);
        let filter = Filter::Conditions(query.clone());
        let mut out = Vec::new();
        read(&self.shared.pool, |conn| {
            executor::find_filter(conn, collection, &filter, Some(max_results), batch_size, |batch| {
                out.extend(batch);
                Ok(())
            })
        })?;
        Ok(out)
    }

    pub fn bulk_operations(&self) -> BulkOperations<'_> {
        BulkOperations::new(&self.shared)
    }

    // ========== VALIDATORS & EVENTS ==========

    /// Register (or replace) a named validator. Collections refer to validators by name.
    pub fn register_validator<V: Validator + 'static>(&self, name: &str, validator: V) -> Result<()> {
        self.shared.validators.register(name, validator)
    }

    pub fn validators(&self) -> &ValidatorRegistry {
        &self.shared.validators
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    /// Close pooled connections. Handles stay valid but every later call fails with
    /// `PoolClosed`.
    pub fn close(&self) {
        self.shared.pool.shutdown();
        info!("Closed store at {}", self.path().display());
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path())
            .field("pool", &self.pool_status())
            .finish()
    }
}
