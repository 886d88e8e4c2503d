use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use storage::{RecordError, StorageError};
use thiserror::Error;

/// Entries kept by a search that has no keyword.
pub const DEFAULT_PREVIEW_LIMIT: usize = 25;

/// How the second auxiliary search field (`inputCodeWb`) is read.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuxFieldMode {
    /// Compare `inputCodeWb` against its own value.
    #[default]
    Own,
    /// Legacy output: when `inputCodeWb` is present, a case-insensitive search
    /// compares against the upper-cased `inputCode` instead.
    MirrorInputCode,
}

/// Tuning shared by every query a handle runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryConfig {
    /// Cap on the aggregate when the keyword is empty or absent.
    #[serde(default = "QueryConfig::default_preview_limit")]
    pub preview_limit: usize,
    #[serde(default)]
    pub aux_field_mode: AuxFieldMode,
}

impl QueryConfig {
    pub(crate) fn default_preview_limit() -> usize {
        DEFAULT_PREVIEW_LIMIT
    }

    pub fn with_preview_limit(mut self, limit: usize) -> Self {
        self.preview_limit = limit;
        self
    }

    pub fn with_aux_field_mode(mut self, mode: AuxFieldMode) -> Self {
        self.aux_field_mode = mode;
        self
    }
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            preview_limit: DEFAULT_PREVIEW_LIMIT,
            aux_field_mode: AuxFieldMode::default(),
        }
    }
}

/// Field-to-value equality constraints on a record payload.
///
/// A falsy expected value (`null`, `false`, `0`, `""`) is a wildcard.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct ExactFilter(Map<String, Value>);

impl ExactFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the constraint on `field`.
    pub fn with(mut self, field: impl Into<String>, expected: impl Into<Value>) -> Self {
        self.0.insert(field.into(), expected.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for ExactFilter {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for ExactFilter {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// Databases a handle operates on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Single(String),
    Many(Vec<String>),
}

impl Target {
    /// Database names in configuration order.
    pub fn names(&self) -> Vec<String> {
        match self {
            Target::Single(name) => vec![name.clone()],
            Target::Many(names) => names.clone(),
        }
    }

    /// The one database this target names, for single-database operations.
    pub fn single(&self, operation: &'static str) -> Result<&str, QueryError> {
        match self {
            Target::Single(name) => Ok(name),
            Target::Many(names) => match names.as_slice() {
                [name] => Ok(name),
                [] => Err(QueryError::NoDatabase { operation }),
                _ => Err(QueryError::MultipleDatabases {
                    operation,
                    count: names.len(),
                }),
            },
        }
    }
}

impl From<&str> for Target {
    fn from(name: &str) -> Self {
        Target::Single(name.to_string())
    }
}

impl From<String> for Target {
    fn from(name: String) -> Self {
        Target::Single(name)
    }
}

impl From<Vec<String>> for Target {
    fn from(names: Vec<String>) -> Self {
        Target::Many(names)
    }
}

impl From<&[&str]> for Target {
    fn from(names: &[&str]) -> Self {
        Target::Many(names.iter().map(|n| n.to_string()).collect())
    }
}

impl<const N: usize> From<[&str; N]> for Target {
    fn from(names: [&str; N]) -> Self {
        Target::Many(names.iter().map(|n| n.to_string()).collect())
    }
}

/// Overall status of a search.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Success,
    SoftFailure,
}

/// One matching payload and the database it came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Hit {
    pub origin: String,
    pub payload: Value,
}

impl Hit {
    /// The payload with its origin written into a `dbName` field.
    pub fn tagged(&self) -> Value {
        let mut payload = self.payload.clone();
        if let Value::Object(map) = &mut payload {
            map.insert("dbName".to_string(), Value::String(self.origin.clone()));
        }
        payload
    }
}

/// Why one database contributed nothing to a search.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DatabaseFailure {
    pub database: String,
    pub reason: String,
}

/// Aggregate outcome of a search across every configured database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryResult {
    pub status: QueryStatus,
    pub records: Vec<Hit>,
    pub message: String,
    /// Databases that failed or lacked the table, in configuration order.
    #[serde(default)]
    pub failures: Vec<DatabaseFailure>,
}

impl QueryResult {
    pub fn is_success(&self) -> bool {
        self.status == QueryStatus::Success
    }

    /// Numeric status as the legacy lookup API reported it.
    pub fn code(&self) -> u16 {
        match self.status {
            QueryStatus::Success => 200,
            QueryStatus::SoftFailure => 500,
        }
    }
}

/// Errors raised before or during single-database operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("`{operation}` works on one database, handle targets {count}")]
    MultipleDatabases {
        operation: &'static str,
        count: usize,
    },
    #[error("`{operation}` needs a database, handle targets none")]
    NoDatabase { operation: &'static str },
    #[error("code list must not be empty")]
    EmptyCodes,
    #[error("record {position} is invalid: {reason}")]
    InvalidRecord {
        position: usize,
        reason: RecordError,
    },
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl QueryError {
    /// True for caller mistakes rejected before any storage access.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            QueryError::MultipleDatabases { .. } | QueryError::NoDatabase { .. } | QueryError::EmptyCodes
        )
    }
}
