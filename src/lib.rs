//! Workspace umbrella crate for dictcache.
//!
//! Builds a storage engine from configuration and hands out [`StoreHandle`]s
//! that search, filter, and resolve codes across locally cached dictionaries.
//!
//! ```
//! use dictcache::DictCache;
//! use serde_json::json;
//!
//! # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
//! let cache = DictCache::in_memory();
//! cache
//!     .store("units")
//!     .load(None, vec![json!({"itemCode": "mg", "itemName": "milligram"})])
//!     .await
//!     .unwrap();
//!
//! let result = cache.stores(["units", "doses"]).search("gram").await;
//! assert_eq!(result.records.len(), 1);
//! assert_eq!(result.failures[0].database, "doses");
//! # });
//! ```

pub mod config;

pub use config::{BackendKind, CacheConfig, ConfigLoadError, QueryYamlConfig, StorageYamlConfig};
pub use query::{
    AuxFieldMode, DatabaseFailure, ExactFilter, Hit, QueryConfig, QueryEngine, QueryError,
    QueryResult, QueryStatus, SearchRequest, StoreHandle, Target, DEFAULT_PREVIEW_LIMIT,
};
pub use storage::{
    BackendConfig, Connection, InMemoryEngine, LoadOutcome, Record, RecordError, StorageEngine,
    StorageError, TableLoad, UpgradeOutcome, DEFAULT_TABLE,
};

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::info;

/// Errors raised while building or driving a [`DictCache`].
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigLoadError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("query error: {0}")]
    Query(#[from] QueryError),
}

/// Entry point owning one storage engine and the defaults every handle starts from.
#[derive(Clone)]
pub struct DictCache {
    storage: Arc<dyn StorageEngine>,
    query: QueryConfig,
    default_table: String,
}

impl DictCache {
    /// Wrap an already built engine.
    pub fn new(storage: Arc<dyn StorageEngine>, query: QueryConfig) -> Self {
        Self {
            storage,
            query,
            default_table: DEFAULT_TABLE.to_string(),
        }
    }

    /// Everything in memory, default query settings.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryEngine::new()), QueryConfig::default())
    }

    pub fn from_config(config: &CacheConfig) -> Result<Self, CacheError> {
        let backend = config.backend_config();
        let storage = backend.build()?;
        info!(
            backend = ?config.storage.backend,
            default_table = %config.query.default_table,
            preview_limit = config.query.preview_limit,
            "cache_opened"
        );
        Ok(Self::new(storage, config.query_config())
            .with_default_table(config.query.default_table.clone()))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        let config = CacheConfig::from_file(path)?;
        Self::from_config(&config)
    }

    pub fn with_default_table(mut self, table: impl Into<String>) -> Self {
        self.default_table = table.into();
        self
    }

    /// Handle over a single database.
    pub fn store(&self, database: impl Into<String>) -> StoreHandle {
        self.handle(Target::Single(database.into()))
    }

    /// Handle over several databases, searched in the given order.
    pub fn stores<I, S>(&self, databases: I) -> StoreHandle
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.handle(Target::Many(databases.into_iter().map(Into::into).collect()))
    }

    fn handle(&self, target: Target) -> StoreHandle {
        StoreHandle::new(Arc::clone(&self.storage), target)
            .table(self.default_table.clone())
            .with_config(self.query.clone())
    }

    pub fn engine(&self) -> Arc<dyn StorageEngine> {
        Arc::clone(&self.storage)
    }

    pub fn query_config(&self) -> &QueryConfig {
        &self.query
    }

    pub fn default_table(&self) -> &str {
        &self.default_table
    }
}

impl std::fmt::Debug for DictCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DictCache")
            .field("query", &self.query)
            .field("default_table", &self.default_table)
            .finish_non_exhaustive()
    }
}
