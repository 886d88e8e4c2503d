//! YAML configuration file support for dictcache.
//!
//! One file selects the storage backend and the query defaults every store
//! handle starts from.
//!
//! ## Example YAML Configuration
//!
//! ```yaml
//! version: "1.0"
//! name: "pharmacy terminal"
//!
//! storage:
//!   backend: "redb"
//!   path: "/var/cache/dictcache"
//!
//! query:
//!   default_table: "dict"
//!   preview_limit: 25
//!   aux_field_mode: "own"
//! ```

use std::fs;
use std::path::Path;

use query::{AuxFieldMode, DEFAULT_PREVIEW_LIMIT, QueryConfig};
use serde::{Deserialize, Serialize};
use storage::{BackendConfig, DEFAULT_TABLE};
use thiserror::Error;

/// Errors that can occur when loading YAML configuration files
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),

    #[error("missing required field: {0}")]
    MissingField(String),
}

/// Top-level YAML configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CacheConfig {
    /// Configuration format version
    pub version: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub storage: StorageYamlConfig,

    #[serde(default)]
    pub query: QueryYamlConfig,
}

impl CacheConfig {
    /// Load a YAML configuration file from the given path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse YAML configuration from a string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: CacheConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;

        self.storage.validate()?;
        self.query.validate()?;
        Ok(())
    }

    /// Storage engine described by the `storage` section.
    pub fn backend_config(&self) -> BackendConfig {
        self.storage.to_backend_config()
    }

    /// Query tuning described by the `query` section.
    pub fn query_config(&self) -> QueryConfig {
        self.query.to_query_config()
    }

    pub fn to_yaml(&self) -> Result<String, ConfigLoadError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            name: None,
            storage: StorageYamlConfig::default(),
            query: QueryYamlConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    InMemory,
    Redb,
}

/// Storage YAML configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageYamlConfig {
    #[serde(default)]
    pub backend: BackendKind,

    /// Directory holding one redb file per database. Required for `redb`.
    #[serde(default)]
    pub path: Option<String>,
}

impl StorageYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.backend == BackendKind::Redb {
            match self.path.as_deref() {
                None => return Err(ConfigLoadError::MissingField("storage.path".to_string())),
                Some(path) if path.trim().is_empty() => {
                    return Err(ConfigLoadError::Validation(
                        "storage.path must not be empty".to_string(),
                    ));
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    fn to_backend_config(&self) -> BackendConfig {
        match (self.backend, &self.path) {
            (BackendKind::Redb, Some(path)) => BackendConfig::redb(path.clone()),
            _ => BackendConfig::in_memory(),
        }
    }
}

/// Query defaults YAML configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryYamlConfig {
    #[serde(default = "default_table")]
    pub default_table: String,

    #[serde(default = "default_preview_limit")]
    pub preview_limit: usize,

    #[serde(default)]
    pub aux_field_mode: AuxFieldMode,
}

impl QueryYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.default_table.trim().is_empty() {
            return Err(ConfigLoadError::Validation(
                "query.default_table must not be empty".to_string(),
            ));
        }
        if self.preview_limit == 0 {
            return Err(ConfigLoadError::Validation(
                "query.preview_limit must be >= 1".to_string(),
            ));
        }
        Ok(())
    }

    fn to_query_config(&self) -> QueryConfig {
        QueryConfig::default()
            .with_preview_limit(self.preview_limit)
            .with_aux_field_mode(self.aux_field_mode)
    }
}

impl Default for QueryYamlConfig {
    fn default() -> Self {
        Self {
            default_table: default_table(),
            preview_limit: default_preview_limit(),
            aux_field_mode: AuxFieldMode::default(),
        }
    }
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

fn default_preview_limit() -> usize {
    DEFAULT_PREVIEW_LIMIT
}
