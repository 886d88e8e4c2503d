use crate::{
    order_by_index, Connection, IndexSpec, Record, SchemaOp, StorageEngine, StorageError,
    UpgradeOutcome, INITIAL_VERSION,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::debug;

/// Configuration for selecting and building a storage engine.
///
/// # Example
/// ```
/// use storage::BackendConfig;
///
/// // In-memory (for testing)
/// let config = BackendConfig::in_memory();
///
/// // Redb, one file per logical database under the directory
/// let config = BackendConfig::redb("/var/cache/dictcache");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum BackendConfig {
    /// Use redb files under the directory `path`, one per logical database.
    ///
    /// Requires the `backend-redb` feature to be enabled at compile time (enabled by default).
    Redb { path: String },
    /// Keep every database in memory. This is useful for testing.
    #[default]
    InMemory,
}

impl BackendConfig {
    /// Create an in-memory backend configuration.
    pub fn in_memory() -> Self {
        BackendConfig::InMemory
    }

    /// Create a redb backend configuration rooted at the directory `path`.
    pub fn redb<P: Into<String>>(path: P) -> Self {
        BackendConfig::Redb { path: path.into() }
    }

    /// Build the engine described by this configuration.
    pub fn build(&self) -> Result<Arc<dyn StorageEngine>, StorageError> {
        match self {
            BackendConfig::InMemory => Ok(Arc::new(InMemoryEngine::new())),
            BackendConfig::Redb { path } => {
                #[cfg(feature = "backend-redb")]
                {
                    Ok(Arc::new(RedbEngine::open(path)?))
                }
                #[cfg(not(feature = "backend-redb"))]
                {
                    let _ = path;
                    Err(StorageError::backend("redb backend disabled at compile time"))
                }
            }
        }
    }
}

#[derive(Clone, Default)]
struct MemTable {
    indexes: Vec<IndexSpec>,
    rows: BTreeMap<u64, Record>,
    next_key: u64,
}

struct MemDatabase {
    version: u64,
    tables: HashMap<String, MemTable>,
}

impl MemDatabase {
    fn new() -> Self {
        Self {
            version: INITIAL_VERSION,
            tables: HashMap::new(),
        }
    }

    fn apply(&mut self, database: &str, op: SchemaOp) -> Result<(), StorageError> {
        match op {
            SchemaOp::DeleteTable(name) => {
                self.tables.remove(&name);
            }
            SchemaOp::CreateTable { name, indexes } => {
                if self.tables.contains_key(&name) {
                    return Err(StorageError::backend(format!(
                        "table `{name}` already exists in `{database}`"
                    )));
                }
                self.tables.insert(
                    name,
                    MemTable {
                        indexes,
                        ..MemTable::default()
                    },
                );
            }
            SchemaOp::Insert { table, records } => {
                let target = self
                    .tables
                    .get_mut(&table)
                    .ok_or_else(|| StorageError::table_missing(database, &table))?;
                for record in records {
                    target.next_key += 1;
                    target.rows.insert(target.next_key, record);
                }
            }
        }
        Ok(())
    }
}

type SharedDatabase = Arc<RwLock<MemDatabase>>;

/// An in-memory engine; each logical database lives behind its own `RwLock`.
pub struct InMemoryEngine {
    databases: RwLock<HashMap<String, SharedDatabase>>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self {
            databases: RwLock::new(HashMap::new()),
        }
    }

    fn database(&self, name: &str) -> Result<SharedDatabase, StorageError> {
        let mut guard = self
            .databases
            .write()
            .map_err(|_| StorageError::backend("poisoned lock"))?;
        Ok(Arc::clone(
            guard
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(MemDatabase::new()))),
        ))
    }
}

impl Default for InMemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageEngine for InMemoryEngine {
    async fn open(&self, database: &str) -> Result<Box<dyn Connection>, StorageError> {
        let shared = self.database(database)?;
        let (version, tables) = {
            let guard = shared
                .read()
                .map_err(|_| StorageError::backend("poisoned lock"))?;
            (guard.version, guard.tables.keys().cloned().collect())
        };
        Ok(Box::new(InMemoryConnection {
            name: database.to_string(),
            version,
            tables,
            shared,
        }))
    }

    async fn upgrade(
        &self,
        database: &str,
        version: u64,
        ops: Vec<SchemaOp>,
    ) -> Result<UpgradeOutcome, StorageError> {
        let shared = self.database(database)?;
        let mut guard = shared
            .write()
            .map_err(|_| StorageError::backend("poisoned lock"))?;
        let current = guard.version;
        if version < current {
            return Err(StorageError::VersionConflict {
                database: database.to_string(),
                requested: version,
                current,
            });
        }
        if version == current {
            return Ok(UpgradeOutcome::Unchanged { version });
        }

        // Ops run against a copy so a failing op leaves the database untouched.
        let mut staged = MemDatabase {
            version,
            tables: guard.tables.clone(),
        };
        for op in ops {
            staged.apply(database, op)?;
        }
        *guard = staged;
        Ok(UpgradeOutcome::Applied {
            from: current,
            to: version,
        })
    }

    async fn delete_database(&self, database: &str) -> Result<(), StorageError> {
        self.databases
            .write()
            .map_err(|_| StorageError::backend("poisoned lock"))?
            .remove(database);
        Ok(())
    }
}

struct InMemoryConnection {
    name: String,
    version: u64,
    tables: Vec<String>,
    shared: SharedDatabase,
}

#[async_trait]
impl Connection for InMemoryConnection {
    fn database(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn table_names(&self) -> Vec<String> {
        self.tables.clone()
    }

    async fn index_scan(&self, table: &str, index: &str) -> Result<Vec<Record>, StorageError> {
        // The read lock is held for the duration of the scan.
        let guard = self
            .shared
            .read()
            .map_err(|_| StorageError::backend("poisoned lock"))?;
        let stored = guard
            .tables
            .get(table)
            .ok_or_else(|| StorageError::table_missing(&self.name, table))?;
        let spec = stored
            .indexes
            .iter()
            .find(|spec| spec.name == index)
            .ok_or_else(|| StorageError::IndexMissing {
                table: table.to_string(),
                index: index.to_string(),
            })?;
        let mut records: Vec<Record> = stored.rows.values().cloned().collect();
        order_by_index(&mut records, spec.field);
        Ok(records)
    }

    async fn clear(&self, table: &str) -> Result<(), StorageError> {
        let mut guard = self
            .shared
            .write()
            .map_err(|_| StorageError::backend("poisoned lock"))?;
        let stored = guard
            .tables
            .get_mut(table)
            .ok_or_else(|| StorageError::table_missing(&self.name, table))?;
        stored.rows.clear();
        Ok(())
    }

    fn close(self: Box<Self>) {
        debug!(database = %self.name, "connection_closed");
    }
}

/// The redb engine implementation.
///
/// Redb is a pure Rust ACID-compliant embedded database; each logical
/// database maps to one redb file.
#[cfg(feature = "backend-redb")]
pub mod redb;

#[cfg(feature = "backend-redb")]
pub use self::redb::RedbEngine;
