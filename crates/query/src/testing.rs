//! Storage wrapper for exercising the query layer under delays and faults.
//!
//! Wraps a real engine; per-database scan delays, open failures, and scan
//! failures are configured up front, and every open/close is counted.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use storage::{Connection, Record, SchemaOp, StorageEngine, StorageError, UpgradeOutcome};

#[derive(Default)]
struct Counters {
    opens: AtomicUsize,
    closes: AtomicUsize,
    calls: AtomicUsize,
}

/// A [`StorageEngine`] that delegates to `inner` with scripted behavior.
pub(crate) struct ScriptedEngine {
    inner: Arc<dyn StorageEngine>,
    scan_delays: HashMap<String, Duration>,
    failing_opens: HashSet<String>,
    failing_scans: HashSet<String>,
    counters: Arc<Counters>,
}

impl ScriptedEngine {
    pub fn new(inner: Arc<dyn StorageEngine>) -> Self {
        Self {
            inner,
            scan_delays: HashMap::new(),
            failing_opens: HashSet::new(),
            failing_scans: HashSet::new(),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Hold every scan of `database` for `delay` before answering.
    pub fn delay_scan(mut self, database: &str, delay: Duration) -> Self {
        self.scan_delays.insert(database.to_string(), delay);
        self
    }

    pub fn fail_open(mut self, database: &str) -> Self {
        self.failing_opens.insert(database.to_string());
        self
    }

    pub fn fail_scan(mut self, database: &str) -> Self {
        self.failing_scans.insert(database.to_string());
        self
    }

    /// Successful opens so far.
    pub fn opens(&self) -> usize {
        self.counters.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.counters.closes.load(Ordering::SeqCst)
    }

    /// Every engine call so far, including failed opens, upgrades, and deletes.
    pub fn calls(&self) -> usize {
        self.counters.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StorageEngine for ScriptedEngine {
    async fn open(&self, database: &str) -> Result<Box<dyn Connection>, StorageError> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing_opens.contains(database) {
            return Err(StorageError::backend(format!("scripted open failure for `{database}`")));
        }
        let inner = self.inner.open(database).await?;
        self.counters.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            inner,
            scan_delay: self.scan_delays.get(database).copied(),
            fail_scan: self.failing_scans.contains(database),
            counters: Arc::clone(&self.counters),
        }))
    }

    async fn upgrade(
        &self,
        database: &str,
        version: u64,
        ops: Vec<SchemaOp>,
    ) -> Result<UpgradeOutcome, StorageError> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.upgrade(database, version, ops).await
    }

    async fn delete_database(&self, database: &str) -> Result<(), StorageError> {
        self.counters.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.delete_database(database).await
    }
}

struct ScriptedConnection {
    inner: Box<dyn Connection>,
    scan_delay: Option<Duration>,
    fail_scan: bool,
    counters: Arc<Counters>,
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn database(&self) -> &str {
        self.inner.database()
    }

    fn version(&self) -> u64 {
        self.inner.version()
    }

    fn table_names(&self) -> Vec<String> {
        self.inner.table_names()
    }

    fn has_table(&self, table: &str) -> bool {
        self.inner.has_table(table)
    }

    async fn index_scan(&self, table: &str, index: &str) -> Result<Vec<Record>, StorageError> {
        if let Some(delay) = self.scan_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_scan {
            return Err(StorageError::backend(format!(
                "scripted scan failure for `{}`",
                self.inner.database()
            )));
        }
        self.inner.index_scan(table, index).await
    }

    async fn clear(&self, table: &str) -> Result<(), StorageError> {
        self.inner.clear(table).await
    }

    fn close(self: Box<Self>) {
        let this = *self;
        this.counters.closes.fetch_add(1, Ordering::SeqCst);
        this.inner.close();
    }
}
