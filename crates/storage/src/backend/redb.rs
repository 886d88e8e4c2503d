//! Redb (Rust embedded database) engine for dictcache storage.
//!
//! Every logical database is one redb file named `<database>.redb` under the
//! configured directory. Inside a file:
//! - `__dictcache_meta` holds the database version.
//! - `__dictcache_schema` maps each table name to its JSON-encoded index specs.
//! - every data table maps a `u64` positional key to a JSON-encoded [`Record`].
//!
//! Redb transactions are blocking, so each call runs on tokio's blocking pool.
//!
//! # Configuration Example
//! ```yaml
//! storage:
//!   backend: "redb"
//!   path: "/var/cache/dictcache"
//! ```

use crate::{
    order_by_index, Connection, IndexSpec, Record, SchemaOp, StorageEngine, StorageError,
    UpgradeOutcome, INITIAL_VERSION,
};
use async_trait::async_trait;
use redb::{
    Database, ReadableDatabase, ReadableTable, TableDefinition, TableError, WriteTransaction,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::OnceCell;
use tracing::debug;

const RESERVED_PREFIX: &str = "__dictcache";
const META_TABLE: TableDefinition<&str, u64> = TableDefinition::new("__dictcache_meta");
const SCHEMA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("__dictcache_schema");
const VERSION_KEY: &str = "version";

fn data_table(name: &str) -> TableDefinition<'_, u64, &'static [u8]> {
    TableDefinition::new(name)
}

fn backend_err<E: std::fmt::Display>(e: E) -> StorageError {
    StorageError::backend(e.to_string())
}

/// Redb engine: one ACID redb file per logical database.
///
/// A redb file may only be opened once per process, so open handles are
/// cached by database name until the database is deleted. Each slot is
/// initialized at most once; concurrent first opens of one database wait on
/// the same slot.
pub struct RedbEngine {
    root: PathBuf,
    handles: Mutex<HashMap<String, Arc<HandleSlot>>>,
}

type HandleSlot = OnceCell<Arc<Database>>;

impl RedbEngine {
    /// Use `root` as the directory holding database files, creating it if needed.
    ///
    /// # Example
    /// ```no_run
    /// use storage::RedbEngine;
    ///
    /// let engine = RedbEngine::open("/tmp/dictcache").unwrap();
    /// ```
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root).map_err(backend_err)?;
        Ok(Self {
            root,
            handles: Mutex::new(HashMap::new()),
        })
    }

    fn file_path(&self, database: &str) -> Result<PathBuf, StorageError> {
        if database.is_empty()
            || database.starts_with(RESERVED_PREFIX)
            || database.contains(['/', '\\'])
            || database == "."
            || database == ".."
        {
            return Err(StorageError::InvalidName(database.to_string()));
        }
        Ok(self.root.join(format!("{database}.redb")))
    }

    fn slot(&self, database: &str) -> Result<Arc<HandleSlot>, StorageError> {
        let mut handles = self
            .handles
            .lock()
            .map_err(|_| StorageError::backend("poisoned lock"))?;
        Ok(Arc::clone(handles.entry(database.to_string()).or_default()))
    }

    async fn handle(&self, database: &str) -> Result<Arc<Database>, StorageError> {
        let path = self.file_path(database)?;
        let slot = self.slot(database)?;
        let db = slot
            .get_or_try_init(|| {
                blocking(move || {
                    let db = Database::create(path).map_err(backend_err)?;
                    init_meta(&db)?;
                    Ok(Arc::new(db))
                })
            })
            .await?;
        Ok(Arc::clone(db))
    }
}

/// Make sure the metadata tables exist and a fresh file starts at version 1.
fn init_meta(db: &Database) -> Result<(), StorageError> {
    let write_txn = db.begin_write().map_err(backend_err)?;
    {
        let mut meta = write_txn.open_table(META_TABLE).map_err(backend_err)?;
        let missing = meta.get(VERSION_KEY).map_err(backend_err)?.is_none();
        if missing {
            meta.insert(VERSION_KEY, INITIAL_VERSION)
                .map_err(backend_err)?;
        }
        let _schema = write_txn.open_table(SCHEMA_TABLE).map_err(backend_err)?;
    }
    write_txn.commit().map_err(backend_err)?;
    Ok(())
}

/// Version and table schemas from a single read snapshot.
fn read_state(db: &Database) -> Result<(u64, HashMap<String, Vec<IndexSpec>>), StorageError> {
    let read_txn = db.begin_read().map_err(backend_err)?;

    let meta = read_txn.open_table(META_TABLE).map_err(backend_err)?;
    let version = meta
        .get(VERSION_KEY)
        .map_err(backend_err)?
        .map(|v| v.value())
        .unwrap_or(INITIAL_VERSION);

    let schema = read_txn.open_table(SCHEMA_TABLE).map_err(backend_err)?;
    let mut tables = HashMap::new();
    for item in schema.iter().map_err(backend_err)? {
        let (name, specs) = item.map_err(backend_err)?;
        let specs: Vec<IndexSpec> = serde_json::from_slice(specs.value())?;
        tables.insert(name.value().to_string(), specs);
    }
    Ok((version, tables))
}

fn apply_op(txn: &WriteTransaction, database: &str, op: SchemaOp) -> Result<(), StorageError> {
    match op {
        SchemaOp::DeleteTable(name) => {
            txn.delete_table(data_table(&name)).map_err(backend_err)?;
            let mut schema = txn.open_table(SCHEMA_TABLE).map_err(backend_err)?;
            schema.remove(name.as_str()).map_err(backend_err)?;
        }
        SchemaOp::CreateTable { name, indexes } => {
            if name.starts_with(RESERVED_PREFIX) {
                return Err(StorageError::InvalidName(name));
            }
            let mut schema = txn.open_table(SCHEMA_TABLE).map_err(backend_err)?;
            if schema.get(name.as_str()).map_err(backend_err)?.is_some() {
                return Err(StorageError::backend(format!(
                    "table `{name}` already exists in `{database}`"
                )));
            }
            let encoded = serde_json::to_vec(&indexes)?;
            schema
                .insert(name.as_str(), encoded.as_slice())
                .map_err(backend_err)?;
            let _table = txn.open_table(data_table(&name)).map_err(backend_err)?;
        }
        SchemaOp::Insert { table, records } => {
            let schema = txn.open_table(SCHEMA_TABLE).map_err(backend_err)?;
            if schema.get(table.as_str()).map_err(backend_err)?.is_none() {
                return Err(StorageError::table_missing(database, &table));
            }
            let mut data = txn.open_table(data_table(&table)).map_err(backend_err)?;
            let mut next_key = data
                .last()
                .map_err(backend_err)?
                .map(|(key, _)| key.value())
                .unwrap_or(0);
            for record in records {
                next_key += 1;
                let encoded = serde_json::to_vec(&record)?;
                data.insert(next_key, encoded.as_slice())
                    .map_err(backend_err)?;
            }
        }
    }
    Ok(())
}

async fn blocking<T, F>(task: F) -> Result<T, StorageError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
{
    tokio::task::spawn_blocking(task)
        .await
        .map_err(|e| StorageError::backend(format!("blocking task failed: {e}")))?
}

#[async_trait]
impl StorageEngine for RedbEngine {
    async fn open(&self, database: &str) -> Result<Box<dyn Connection>, StorageError> {
        let db = self.handle(database).await?;
        let reader = Arc::clone(&db);
        let (version, tables) = blocking(move || read_state(&reader)).await?;
        Ok(Box::new(RedbConnection {
            name: database.to_string(),
            version,
            tables,
            db,
        }))
    }

    async fn upgrade(
        &self,
        database: &str,
        version: u64,
        ops: Vec<SchemaOp>,
    ) -> Result<UpgradeOutcome, StorageError> {
        let db = self.handle(database).await?;
        let name = database.to_string();
        blocking(move || {
            // One write transaction covers the version check and every op.
            let write_txn = db.begin_write().map_err(backend_err)?;
            let current = {
                let meta = write_txn.open_table(META_TABLE).map_err(backend_err)?;
                let stored = meta.get(VERSION_KEY).map_err(backend_err)?;
                stored.map(|v| v.value()).unwrap_or(INITIAL_VERSION)
            };
            if version < current {
                return Err(StorageError::VersionConflict {
                    database: name,
                    requested: version,
                    current,
                });
            }
            if version == current {
                write_txn.abort().map_err(backend_err)?;
                return Ok(UpgradeOutcome::Unchanged { version });
            }
            for op in ops {
                apply_op(&write_txn, &name, op)?;
            }
            {
                let mut meta = write_txn.open_table(META_TABLE).map_err(backend_err)?;
                meta.insert(VERSION_KEY, version).map_err(backend_err)?;
            }
            write_txn.commit().map_err(backend_err)?;
            Ok(UpgradeOutcome::Applied {
                from: current,
                to: version,
            })
        })
        .await
    }

    async fn delete_database(&self, database: &str) -> Result<(), StorageError> {
        let path = self.file_path(database)?;
        self.handles
            .lock()
            .map_err(|_| StorageError::backend("poisoned lock"))?
            .remove(database);
        blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(backend_err(e)),
        })
        .await
    }
}

struct RedbConnection {
    name: String,
    version: u64,
    tables: HashMap<String, Vec<IndexSpec>>,
    db: Arc<Database>,
}

#[async_trait]
impl Connection for RedbConnection {
    fn database(&self) -> &str {
        &self.name
    }

    fn version(&self) -> u64 {
        self.version
    }

    fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    fn has_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    async fn index_scan(&self, table: &str, index: &str) -> Result<Vec<Record>, StorageError> {
        let spec = self
            .tables
            .get(table)
            .ok_or_else(|| StorageError::table_missing(&self.name, table))?
            .iter()
            .find(|spec| spec.name == index)
            .cloned()
            .ok_or_else(|| StorageError::IndexMissing {
                table: table.to_string(),
                index: index.to_string(),
            })?;
        let db = Arc::clone(&self.db);
        let database = self.name.clone();
        let table = table.to_string();
        blocking(move || {
            let read_txn = db.begin_read().map_err(backend_err)?;
            let data = match read_txn.open_table(data_table(&table)) {
                Ok(data) => data,
                Err(TableError::TableDoesNotExist(_)) => {
                    return Err(StorageError::table_missing(&database, &table))
                }
                Err(e) => return Err(backend_err(e)),
            };
            let mut records = Vec::new();
            for item in data.iter().map_err(backend_err)? {
                let (_, value) = item.map_err(backend_err)?;
                records.push(serde_json::from_slice::<Record>(value.value())?);
            }
            order_by_index(&mut records, spec.field);
            Ok(records)
        })
        .await
    }

    async fn clear(&self, table: &str) -> Result<(), StorageError> {
        if !self.has_table(table) {
            return Err(StorageError::table_missing(&self.name, table));
        }
        let db = Arc::clone(&self.db);
        let table = table.to_string();
        blocking(move || {
            let write_txn = db.begin_write().map_err(backend_err)?;
            write_txn
                .delete_table(data_table(&table))
                .map_err(backend_err)?;
            {
                let _table = write_txn
                    .open_table(data_table(&table))
                    .map_err(backend_err)?;
            }
            write_txn.commit().map_err(backend_err)?;
            Ok(())
        })
        .await
    }

    fn close(self: Box<Self>) {
        debug!(database = %self.name, "connection_closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IndexField, CODE_INDEX, NAME_INDEX};
    use serde_json::json;
    use tempfile::TempDir;

    fn dict_ops(records: Vec<Record>) -> Vec<SchemaOp> {
        vec![
            SchemaOp::DeleteTable("dict".into()),
            SchemaOp::CreateTable {
                name: "dict".into(),
                indexes: vec![
                    IndexSpec::new(CODE_INDEX, IndexField::ItemCode),
                    IndexSpec::new(NAME_INDEX, IndexField::ItemName),
                ],
            },
            SchemaOp::Insert {
                table: "dict".into(),
                records,
            },
        ]
    }

    #[tokio::test]
    async fn test_redb_open_creates_versioned_database() {
        let dir = TempDir::new().unwrap();
        let engine = RedbEngine::open(dir.path()).unwrap();

        let conn = engine.open("drugs").await.unwrap();
        assert_eq!(conn.version(), INITIAL_VERSION);
        assert!(!conn.has_table("dict"));
        conn.close();
        assert!(dir.path().join("drugs.redb").exists());
    }

    #[tokio::test]
    async fn test_redb_upgrade_and_scan() {
        let dir = TempDir::new().unwrap();
        let engine = RedbEngine::open(dir.path()).unwrap();
        let records = vec![
            Record::new("B2", "beta", json!({"itemCode": "B2"})),
            Record::new("A1", "alpha", json!({"itemCode": "A1"})),
        ];
        let outcome = engine.upgrade("drugs", 2, dict_ops(records)).await.unwrap();
        assert_eq!(outcome, UpgradeOutcome::Applied { from: 1, to: 2 });

        let conn = engine.open("drugs").await.unwrap();
        assert_eq!(conn.version(), 2);
        assert!(conn.has_table("dict"));
        let rows = conn.index_scan("dict", NAME_INDEX).await.unwrap();
        let codes: Vec<_> = rows.iter().map(|r| r.item_code.as_str()).collect();
        assert_eq!(codes, ["A1", "B2"]);
        assert_eq!(rows[0].value, json!({"itemCode": "A1"}));
    }

    #[tokio::test]
    async fn test_redb_reload_replaces_table() {
        let dir = TempDir::new().unwrap();
        let engine = RedbEngine::open(dir.path()).unwrap();
        engine
            .upgrade("drugs", 2, dict_ops(vec![Record::new("A1", "a", json!({}))]))
            .await
            .unwrap();
        engine
            .upgrade("drugs", 3, dict_ops(vec![Record::new("Z9", "z", json!({}))]))
            .await
            .unwrap();

        let conn = engine.open("drugs").await.unwrap();
        let rows = conn.index_scan("dict", CODE_INDEX).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].item_code, "Z9");
    }

    #[tokio::test]
    async fn test_redb_version_conflict_and_unchanged() {
        let dir = TempDir::new().unwrap();
        let engine = RedbEngine::open(dir.path()).unwrap();
        engine.upgrade("drugs", 4, dict_ops(vec![])).await.unwrap();

        let same = engine.upgrade("drugs", 4, dict_ops(vec![])).await.unwrap();
        assert_eq!(same, UpgradeOutcome::Unchanged { version: 4 });

        let err = engine.upgrade("drugs", 3, vec![]).await.unwrap_err();
        assert!(matches!(err, StorageError::VersionConflict { current: 4, .. }));
    }

    #[tokio::test]
    async fn test_redb_clear_and_delete() {
        let dir = TempDir::new().unwrap();
        let engine = RedbEngine::open(dir.path()).unwrap();
        engine
            .upgrade("drugs", 2, dict_ops(vec![Record::new("A1", "a", json!({}))]))
            .await
            .unwrap();

        let conn = engine.open("drugs").await.unwrap();
        conn.clear("dict").await.unwrap();
        assert!(conn.index_scan("dict", NAME_INDEX).await.unwrap().is_empty());
        assert!(matches!(
            conn.clear("missing").await.unwrap_err(),
            StorageError::TableMissing { .. }
        ));
        conn.close();

        engine.delete_database("drugs").await.unwrap();
        assert!(!dir.path().join("drugs.redb").exists());
        let reopened = engine.open("drugs").await.unwrap();
        assert_eq!(reopened.version(), INITIAL_VERSION);
    }

    #[test]
    fn test_redb_rejects_unsafe_names() {
        let dir = TempDir::new().unwrap();
        let engine = RedbEngine::open(dir.path()).unwrap();
        for name in ["", "../escape", "a/b", "__dictcache_meta", ".."] {
            assert!(matches!(
                engine.file_path(name),
                Err(StorageError::InvalidName(_))
            ));
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_redb_concurrent_first_opens_share_one_handle() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(RedbEngine::open(dir.path()).unwrap());

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..16 {
            let engine = Arc::clone(&engine);
            let database = if i % 2 == 0 { "drugs" } else { "herbs" };
            tasks.spawn(async move {
                let conn = engine.open(database).await?;
                let version = conn.version();
                conn.close();
                Ok::<_, StorageError>(version)
            });
        }
        while let Some(joined) = tasks.join_next().await {
            assert_eq!(joined.unwrap().unwrap(), INITIAL_VERSION);
        }
        assert!(dir.path().join("drugs.redb").exists());
        assert!(dir.path().join("herbs.redb").exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_redb_open_sees_version_and_tables_from_one_snapshot() {
        let dir = TempDir::new().unwrap();
        let engine = Arc::new(RedbEngine::open(dir.path()).unwrap());
        engine.open("drugs").await.unwrap().close();

        let writer = {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                for version in 2..30 {
                    let records = vec![Record::new("A1", "a", json!({}))];
                    engine
                        .upgrade("drugs", version, dict_ops(records))
                        .await
                        .unwrap();
                }
            })
        };

        for _ in 0..200 {
            let conn = engine.open("drugs").await.unwrap();
            assert_eq!(conn.version() > INITIAL_VERSION, conn.has_table("dict"));
            conn.close();
        }
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_redb_delete_missing_database_is_ok() {
        let dir = TempDir::new().unwrap();
        let engine = RedbEngine::open(dir.path()).unwrap();
        engine.delete_database("never_opened").await.unwrap();
        assert!(matches!(
            engine.delete_database("../up").await.unwrap_err(),
            StorageError::InvalidName(_)
        ));
    }
}
