use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use storage::{StorageEngine, CODE_INDEX, NAME_INDEX};
use tracing::{debug, info, warn, Instrument, Level};

use crate::barrier::{aggregate, settle_all, Settled};
use crate::filter::matches_exact;
use crate::keyword::KeywordMatcher;
use crate::types::{DatabaseFailure, ExactFilter, Hit, QueryConfig, QueryError, QueryResult};


/// One search across one or more databases.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    /// Databases in the order their hits should appear.
    pub databases: Vec<String>,
    pub table: String,
    pub filter: Option<ExactFilter>,
    /// Empty or absent means "preview": no text filter, capped output.
    pub keyword: Option<String>,
    pub case_sensitive: bool,
}

impl SearchRequest {
    fn is_preview(&self) -> bool {
        self.keyword.as_deref().is_none_or(str::is_empty)
    }
}

/// Runs searches and code lookups against a storage engine.
pub struct QueryEngine {
    storage: Arc<dyn StorageEngine>,
    config: QueryConfig,
}

impl QueryEngine {
    pub fn new(storage: Arc<dyn StorageEngine>, config: QueryConfig) -> Self {
        Self { storage, config }
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    /// Search every requested database concurrently and aggregate the hits.
    ///
    /// Never fails: a database that cannot be opened, lacks the table, or
    /// errors during the scan contributes a [`DatabaseFailure`] instead of hits.
    pub async fn search(&self, request: &SearchRequest) -> QueryResult {
        let span = tracing::span!(
            Level::INFO,
            "query.search",
            databases = request.databases.len(),
            table = %request.table,
            preview = request.is_preview()
        );
        self.search_inner(request).instrument(span).await
    }

    async fn search_inner(&self, request: &SearchRequest) -> QueryResult {
        let start = Instant::now();
        let matcher = KeywordMatcher::new(
            request.keyword.as_deref(),
            request.case_sensitive,
            self.config.aux_field_mode,
        );

        let operations = request
            .databases
            .iter()
            .map(|database| self.search_database(database, request, &matcher));
        let outcomes = settle_all(operations).await;

        let limit = request.is_preview().then_some(self.config.preview_limit);
        let result = aggregate(outcomes, limit);

        let elapsed_micros = start.elapsed().as_micros();
        if result.is_success() {
            info!(
                hits = result.records.len(),
                failed_databases = result.failures.len(),
                elapsed_micros,
                "search_success"
            );
        } else {
            warn!(
                failed_databases = result.failures.len(),
                elapsed_micros,
                "search_failure"
            );
        }
        result
    }

    async fn search_database(
        &self,
        database: &str,
        request: &SearchRequest,
        matcher: &KeywordMatcher,
    ) -> Settled {
        let conn = match self.storage.open(database).await {
            Ok(conn) => conn,
            Err(err) => {
                warn!(database, error = %err, "database_open_failed");
                return failed(database, err.to_string());
            }
        };

        if !conn.has_table(&request.table) {
            warn!(database, table = %request.table, "table_missing");
            conn.close();
            return failed(database, format!("table `{}` missing", request.table));
        }

        let scan = conn.index_scan(&request.table, NAME_INDEX).await;
        conn.close();

        match scan {
            Ok(records) => {
                let scanned = records.len();
                let hits: Vec<Hit> = records
                    .into_iter()
                    .filter(|record| matches_exact(record, request.filter.as_ref()))
                    .filter(|record| matcher.matches(record))
                    .map(|record| Hit {
                        origin: database.to_string(),
                        payload: record.value,
                    })
                    .collect();
                debug!(database, scanned, hits = hits.len(), "database_searched");
                Settled::Found(hits)
            }
            Err(err) => {
                warn!(database, error = %err, "index_scan_failed");
                failed(database, err.to_string())
            }
        }
    }

    /// Payloads of `table` in `database` whose code is exactly one of `codes`,
    /// in code-index order.
    ///
    /// A missing table yields an empty list.
    pub async fn match_codes<S: AsRef<str>>(
        &self,
        database: &str,
        table: &str,
        codes: &[S],
    ) -> Result<Vec<Value>, QueryError> {
        if codes.is_empty() {
            warn!(database, "match_codes_empty");
            return Err(QueryError::EmptyCodes);
        }
        let wanted: HashSet<&str> = codes.iter().map(AsRef::as_ref).collect();

        let conn = self.storage.open(database).await?;
        if !conn.has_table(table) {
            warn!(database, table, "table_missing");
            conn.close();
            return Ok(Vec::new());
        }
        let scan = conn.index_scan(table, CODE_INDEX).await;
        conn.close();

        let matched: Vec<Value> = scan?
            .into_iter()
            .filter(|record| wanted.contains(record.item_code.as_str()))
            .map(|record| record.value)
            .collect();
        debug!(
            database,
            table,
            requested = codes.len(),
            matched = matched.len(),
            "codes_matched"
        );
        Ok(matched)
    }
}

fn failed(database: &str, reason: String) -> Settled {
    Settled::Failed(DatabaseFailure {
        database: database.to_string(),
        reason,
    })
}
