// doclite-core/src/lib.rs
// Document data-access layer over an embedded SQLite engine

pub mod error;
pub mod config;
pub mod path;
pub mod document;
pub mod storage;
pub mod query;
pub mod query_builder;
pub mod index;
pub mod query_planner;
pub mod executor;
pub mod aggregation;
pub mod find_options;
pub mod pool;
pub mod transaction;
pub mod validation;
pub mod events;
pub mod bulk;
pub mod collection_core;
pub mod database;

// Public exports
pub use error::{DocLiteError, ErrorKind, Result};
pub use config::{Config, JournalMode, LockingMode, SynchronousMode};
pub use document::{Document, DocumentId, DocumentMeta};
pub use query::{Condition, Filter, IntoFilter, Query, QueryOperator, SortDirection, SortSpec};
pub use query_builder::{field, Expr, Field};
pub use index::{IndexDefinition, IndexFields, IndexType};
pub use query_planner::{AccessPath, QueryPlan, QueryPlanner};
pub use aggregation::{AggregateFunction, AggregationStage, Pipeline};
pub use find_options::FindOptions;
pub use pool::{ConnectionPool, PoolStatus};
pub use transaction::TransactionState;
pub use validation::{Validator, ValidatorRegistry};
pub use events::{EventBus, Observer, StoreEvent, SubscriptionId};
pub use bulk::{BulkOperations, UpdateSpec};
pub use collection_core::Collection;
pub use database::Database;
