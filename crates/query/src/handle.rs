//! Immutable per-call-chain handle over one or more cached dictionaries.

use std::sync::Arc;

use serde_json::Value;
use storage::{load_table, LoadOutcome, Record, StorageEngine, TableLoad, DEFAULT_TABLE};
use tracing::{info, warn};

use crate::engine::{QueryEngine, SearchRequest};
use crate::types::{ExactFilter, QueryConfig, QueryError, QueryResult, Target};

/// Databases, table, and exact filter for a chain of calls.
///
/// Every configuration method returns a new handle, so two queries built from
/// the same base never share filter state.
#[derive(Clone)]
pub struct StoreHandle {
    storage: Arc<dyn StorageEngine>,
    config: QueryConfig,
    target: Target,
    table: String,
    filter: Option<ExactFilter>,
}

impl StoreHandle {
    pub fn new(storage: Arc<dyn StorageEngine>, target: impl Into<Target>) -> Self {
        Self {
            storage,
            config: QueryConfig::default(),
            target: target.into(),
            table: DEFAULT_TABLE.to_string(),
            filter: None,
        }
    }

    pub fn table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    /// Restrict searches to records whose payload fields equal `filter`.
    pub fn where_exact(mut self, filter: ExactFilter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn filter(&self) -> Option<&ExactFilter> {
        self.filter.as_ref()
    }

    fn engine(&self) -> QueryEngine {
        QueryEngine::new(Arc::clone(&self.storage), self.config.clone())
    }

    fn single(&self, operation: &'static str) -> Result<&str, QueryError> {
        self.target.single(operation).inspect_err(|err| {
            warn!(error = %err, "usage_error");
        })
    }

    /// Search every configured database for `keyword`.
    ///
    /// An empty or absent keyword returns a capped preview of the table.
    pub async fn query(&self, keyword: Option<&str>, case_sensitive: bool) -> QueryResult {
        let request = SearchRequest {
            databases: self.target.names(),
            table: self.table.clone(),
            filter: self.filter.clone(),
            keyword: keyword.map(str::to_string),
            case_sensitive,
        };
        self.engine().search(&request).await
    }

    /// Case-insensitive [`query`](Self::query).
    pub async fn search(&self, keyword: &str) -> QueryResult {
        self.query(Some(keyword), false).await
    }

    /// Payloads whose `itemCode` is exactly one of `codes`. Single database only.
    pub async fn match_codes<S: AsRef<str>>(&self, codes: &[S]) -> Result<Vec<Value>, QueryError> {
        let database = self.single("match_codes")?;
        self.engine().match_codes(database, &self.table, codes).await
    }

    /// Replace the table with `payloads`. Single database only.
    ///
    /// `version` is the database version to move to; `None` always reloads.
    pub async fn load(
        &self,
        version: Option<u64>,
        payloads: Vec<Value>,
    ) -> Result<LoadOutcome, QueryError> {
        let database = self.single("load")?;
        let records = payloads
            .into_iter()
            .enumerate()
            .map(|(position, payload)| {
                Record::from_payload(payload)
                    .map_err(|reason| QueryError::InvalidRecord { position, reason })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut load = TableLoad::new(self.table.clone(), records);
        load.version = version;
        Ok(load_table(self.storage.as_ref(), database, load).await?)
    }

    /// Empty the configured table. Single database only.
    pub async fn clear(&self) -> Result<(), QueryError> {
        self.clear_table(&self.table).await
    }

    /// Empty `table`, which need not be the configured one. Single database only.
    pub async fn clear_table(&self, table: &str) -> Result<(), QueryError> {
        let database = self.single("clear_table")?;
        let conn = self.storage.open(database).await?;
        let cleared = conn.clear(table).await;
        conn.close();
        match cleared {
            Ok(()) => {
                info!(database, table, "table_cleared");
                Ok(())
            }
            Err(err) => {
                warn!(database, table, error = %err, "table_clear_failed");
                Err(err.into())
            }
        }
    }

    /// Remove the whole database. Single database only.
    pub async fn delete_database(&self) -> Result<(), QueryError> {
        let database = self.single("delete_database")?;
        match self.storage.delete_database(database).await {
            Ok(()) => {
                info!(database, "database_deleted");
                Ok(())
            }
            Err(err) => {
                warn!(database, error = %err, "database_delete_failed");
                Err(err.into())
            }
        }
    }

    /// Stored version of the database. Single database only.
    pub async fn version(&self) -> Result<u64, QueryError> {
        let database = self.single("version")?;
        let conn = self.storage.open(database).await?;
        let version = conn.version();
        conn.close();
        Ok(version)
    }
}

impl std::fmt::Debug for StoreHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreHandle")
            .field("target", &self.target)
            .field("table", &self.table)
            .field("filter", &self.filter)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
