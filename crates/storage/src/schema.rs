//! Table bootstrap for dictionary loads.
//!
//! A load always replaces the whole table: the previous table is dropped and
//! recreated with the fixed code/name indexes before the new records go in.

use crate::{
    IndexField, IndexSpec, Record, SchemaOp, StorageEngine, StorageError, UpgradeOutcome,
    CODE_INDEX, NAME_INDEX,
};
use tracing::info;

/// Table used when a handle does not name one.
pub const DEFAULT_TABLE: &str = "dict";

/// The two indexes every dictionary table carries.
pub fn dictionary_indexes() -> Vec<IndexSpec> {
    vec![
        IndexSpec::new(CODE_INDEX, IndexField::ItemCode),
        IndexSpec::new(NAME_INDEX, IndexField::ItemName),
    ]
}

/// A full replacement of one table's contents.
#[derive(Clone, Debug, PartialEq)]
pub struct TableLoad {
    pub table: String,
    /// Target database version; `None` moves one past the stored version.
    pub version: Option<u64>,
    pub records: Vec<Record>,
}

impl TableLoad {
    pub fn new(table: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            table: table.into(),
            version: None,
            records,
        }
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = Some(version);
        self
    }
}

/// What a [`load_table`] call did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The table was replaced and the database now sits at `version`.
    Loaded { version: u64, records: usize },
    /// The database was already at the requested version; nothing changed.
    UpToDate { version: u64 },
}

/// Replace `load.table` in `database` with `load.records`.
pub async fn load_table(
    engine: &dyn StorageEngine,
    database: &str,
    load: TableLoad,
) -> Result<LoadOutcome, StorageError> {
    let TableLoad {
        table,
        version,
        records,
    } = load;

    let version = match version {
        Some(version) => version,
        None => {
            let conn = engine.open(database).await?;
            let current = conn.version();
            conn.close();
            current
                .checked_add(1)
                .ok_or_else(|| StorageError::VersionExhausted {
                    database: database.to_string(),
                })?
        }
    };

    let count = records.len();
    let ops = vec![
        SchemaOp::DeleteTable(table.clone()),
        SchemaOp::CreateTable {
            name: table.clone(),
            indexes: dictionary_indexes(),
        },
        SchemaOp::Insert {
            table: table.clone(),
            records,
        },
    ];

    match engine.upgrade(database, version, ops).await? {
        UpgradeOutcome::Applied { from, to } => {
            info!(
                database,
                table = %table,
                from_version = from,
                to_version = to,
                records = count,
                "table_loaded"
            );
            Ok(LoadOutcome::Loaded {
                version: to,
                records: count,
            })
        }
        UpgradeOutcome::Unchanged { version } => {
            info!(database, table = %table, version, "table_up_to_date");
            Ok(LoadOutcome::UpToDate { version })
        }
    }
}
