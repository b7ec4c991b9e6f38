use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::driver::IsolationLevel;

/// Repository settings, usually read from a TOML file.
///
/// ```toml
/// name = "hr"
/// database = "hr.db"
/// fetch_size = 200
/// default_isolation = "serializable"
///
/// [entities.Employee]
/// auto_versioning = true
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepositoryConfig {
    /// Name used in logs and errors.
    pub name: String,
    /// Database file, for data sources built from configuration.
    pub database: Option<PathBuf>,
    /// Catalog scope for table lookup.
    pub catalog: Option<String>,
    /// Schema scope for table lookup. Defaults to the connected user's schema.
    pub schema: Option<String>,
    /// Fetch size hint passed with every query.
    pub fetch_size: Option<u32>,
    /// Compiled statements kept per storage.
    pub statement_cache_capacity: usize,
    /// Always use the sequence table, even when the dialect has sequences.
    pub force_stored_sequence: bool,
    /// Log primary key mismatches instead of failing resolution.
    pub primary_key_check_disabled: bool,
    pub default_isolation: IsolationLevel,
    /// Per-entity options keyed by entity name.
    pub entities: HashMap<String, EntityOptions>,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            name: "tessera".to_owned(),
            database: None,
            catalog: None,
            schema: None,
            fetch_size: None,
            statement_cache_capacity: 64,
            force_stored_sequence: false,
            primary_key_check_disabled: false,
            default_isolation: IsolationLevel::ReadCommitted,
            entities: HashMap::new(),
        }
    }
}

/// Options for one entity type.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct EntityOptions {
    /// Increment the version property on every update.
    pub auto_versioning: bool,
    /// Skip reloading an entity after insert or update.
    pub suppress_reload: bool,
}

impl RepositoryConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|source| ConfigError::Serialize { source })
    }

    /// Loads `explicit`, or the per-user file when it exists, or the defaults.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        match explicit {
            Some(path) => Self::load(path),
            None => match default_config_path().filter(|p| p.exists()) {
                Some(path) => Self::load(&path),
                None => Ok(Self::default()),
            },
        }
    }

    /// Options for `entity`, or the defaults.
    pub fn entity(&self, entity: &str) -> EntityOptions {
        self.entities.get(entity).cloned().unwrap_or_default()
    }
}

/// Per-user configuration file, e.g. `~/.config/tessera/tessera.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|base| base.join("tessera").join("tessera.toml"))
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read repository config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse repository config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to serialize repository config: {source}")]
    Serialize { source: toml::ser::Error },
    #[error("no data source configured; set `database` or pass one to the builder")]
    NoDataSource,
}
