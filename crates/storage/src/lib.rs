//! # dictcache storage
//!
//! This crate is the storage boundary of the dictcache lookup layer. It models a
//! versioned, client-local key-value facility made of named logical databases,
//! each holding named tables of [`Record`] values with secondary indexes.
//!
//! ## Core Features
//!
//! - **Pluggable Backends**: every backend implements [`StorageEngine`] and hands
//!   out [`Connection`]s. Out of the box the crate provides:
//!   - An in-memory engine for fast, ephemeral storage (ideal for testing).
//!   - A redb engine with one file per logical database (enabled via the
//!     `backend-redb` feature).
//! - **Versioned Schema Upgrades**: tables and indexes are only created or dropped
//!   through [`StorageEngine::upgrade`], which bumps the database version.
//! - **Indexed Scans**: [`Connection::index_scan`] returns a full table ordered by
//!   one of its indexes.
//! - **Table Bootstrap**: [`load_table`] replaces a table with a fresh record set
//!   carrying the fixed `itemCode` / `itemName` indexes.
//!
//! ## Example Usage
//!
//! ```
//! use std::sync::Arc;
//! use serde_json::json;
//! use storage::{load_table, BackendConfig, Record, TableLoad, NAME_INDEX};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let engine = BackendConfig::in_memory().build().unwrap();
//!
//! let record = Record::from_payload(json!({"itemCode": "A1", "itemName": "Aspirin"})).unwrap();
//! load_table(engine.as_ref(), "drugs", TableLoad::new("dict", vec![record]))
//!     .await
//!     .unwrap();
//!
//! let conn = engine.open("drugs").await.unwrap();
//! let rows = conn.index_scan("dict", NAME_INDEX).await.unwrap();
//! assert_eq!(rows[0].item_code, "A1");
//! conn.close();
//! # });
//! ```

mod backend;
mod schema;

pub use backend::{BackendConfig, InMemoryEngine};
#[cfg(feature = "backend-redb")]
pub use backend::RedbEngine;
pub use schema::{dictionary_indexes, load_table, LoadOutcome, TableLoad, DEFAULT_TABLE};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Name of the index over [`Record::item_code`].
pub const CODE_INDEX: &str = "itemCode";
/// Name of the index over [`Record::item_name`].
pub const NAME_INDEX: &str = "itemName";

/// Version a logical database has right after it is first created.
pub const INITIAL_VERSION: u64 = 1;

/// A persisted dictionary entry.
///
/// The code and name are lifted out of the original payload so they can be
/// indexed; `value` keeps the payload exactly as it was loaded.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Identity key of the entry, compared as a string.
    pub item_code: String,
    /// Primary searchable text.
    pub item_name: String,
    /// The original payload object.
    pub value: Value,
}

impl Record {
    pub fn new(item_code: impl Into<String>, item_name: impl Into<String>, value: Value) -> Self {
        Self {
            item_code: item_code.into(),
            item_name: item_name.into(),
            value,
        }
    }

    /// Build a record from a raw payload object.
    ///
    /// `itemCode` and `itemName` are required and may be strings or numbers;
    /// numbers are kept as their decimal text.
    pub fn from_payload(value: Value) -> Result<Self, RecordError> {
        let item_code = required_text(&value, "itemCode")?;
        let item_name = required_text(&value, "itemName")?;
        Ok(Self {
            item_code,
            item_name,
            value,
        })
    }

    /// First auxiliary search field (`inputCode`) of the payload.
    pub fn input_code(&self) -> Option<&str> {
        self.value.get("inputCode").and_then(Value::as_str)
    }

    /// Second auxiliary search field (`inputCodeWb`) of the payload.
    pub fn input_code_wb(&self) -> Option<&str> {
        self.value.get("inputCodeWb").and_then(Value::as_str)
    }

    /// Value of the field an index is built over.
    pub fn index_key(&self, field: IndexField) -> &str {
        match field {
            IndexField::ItemCode => &self.item_code,
            IndexField::ItemName => &self.item_name,
        }
    }
}

fn required_text(value: &Value, field: &'static str) -> Result<String, RecordError> {
    match value.get(field) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(Value::Null) | None => Err(RecordError::Missing(field)),
        Some(_) => Err(RecordError::NotText(field)),
    }
}

/// Why a payload could not become a [`Record`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("payload has no `{0}`")]
    Missing(&'static str),
    #[error("`{0}` must be a string or a number")]
    NotText(&'static str),
}

/// Record field an index is keyed on.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IndexField {
    ItemCode,
    ItemName,
}

/// A named secondary index on a table.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub field: IndexField,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, field: IndexField) -> Self {
        Self {
            name: name.into(),
            field,
        }
    }
}

/// One step of a schema upgrade. Steps run in order inside one upgrade.
#[derive(Clone, Debug, PartialEq)]
pub enum SchemaOp {
    /// Drop a table and its indexes. Dropping a missing table is a no-op.
    DeleteTable(String),
    /// Create an empty table with the given indexes.
    CreateTable {
        name: String,
        indexes: Vec<IndexSpec>,
    },
    /// Append records; each one gets the next positional key.
    Insert { table: String, records: Vec<Record> },
}

/// Result of [`StorageEngine::upgrade`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UpgradeOutcome {
    /// The ops ran and the database moved from `from` to `to`.
    Applied { from: u64, to: u64 },
    /// The database was already at the requested version; no op ran.
    Unchanged { version: u64 },
}

/// Storage engine errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("invalid database name `{0}`")]
    InvalidName(String),
    #[error("table `{table}` does not exist in database `{database}`")]
    TableMissing { database: String, table: String },
    #[error("index `{index}` does not exist on table `{table}`")]
    IndexMissing { table: String, index: String },
    #[error("database `{database}` is at version {current}, cannot open at {requested}")]
    VersionConflict {
        database: String,
        requested: u64,
        current: u64,
    },
    #[error("database `{database}` is at the highest version and cannot be reloaded")]
    VersionExhausted { database: String },
    #[error("record codec error: {0}")]
    Codec(String),
}

impl StorageError {
    pub fn backend<S: Into<String>>(msg: S) -> Self {
        StorageError::Backend(msg.into())
    }

    pub(crate) fn table_missing(database: &str, table: &str) -> Self {
        StorageError::TableMissing {
            database: database.to_string(),
            table: table.to_string(),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Codec(e.to_string())
    }
}

/// A versioned key-value storage facility holding many logical databases.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Open a logical database, creating it empty at [`INITIAL_VERSION`] if absent.
    async fn open(&self, database: &str) -> Result<Box<dyn Connection>, StorageError>;

    /// Move a database to `version`, running `ops` atomically.
    ///
    /// A lower version than the stored one fails with
    /// [`StorageError::VersionConflict`]; the same version runs nothing.
    async fn upgrade(
        &self,
        database: &str,
        version: u64,
        ops: Vec<SchemaOp>,
    ) -> Result<UpgradeOutcome, StorageError>;

    /// Remove a logical database. Removing a missing database succeeds.
    async fn delete_database(&self, database: &str) -> Result<(), StorageError>;
}

/// An open connection to one logical database.
///
/// Every read or write runs in its own transaction; the table set is captured
/// when the connection opens.
#[async_trait]
pub trait Connection: Send + Sync {
    fn database(&self) -> &str;

    fn version(&self) -> u64;

    fn table_names(&self) -> Vec<String>;

    fn has_table(&self, table: &str) -> bool {
        self.table_names().iter().any(|name| name == table)
    }

    /// Read every record of `table` in the order of index `index`.
    /// Records with equal index keys keep their positional order.
    async fn index_scan(&self, table: &str, index: &str) -> Result<Vec<Record>, StorageError>;

    /// Remove every record of `table`, keeping the table and its indexes.
    async fn clear(&self, table: &str) -> Result<(), StorageError>;

    fn close(self: Box<Self>);
}

/// Order records by an index key, ties kept in positional order.
pub(crate) fn order_by_index(records: &mut [Record], field: IndexField) {
    records.sort_by(|a, b| a.index_key(field).cmp(b.index_key(field)));
}
