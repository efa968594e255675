//! # Walker Configuration
//!
//! Typed configuration for one archive walk, loaded by [`ConfigManager`] from a
//! TOML file, an optional per-environment overlay and `BOOM_WALKER__*` variables.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use boom_walker::config::ConfigManager;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load_from_file(Path::new("config/walker.toml"), None)?;
//! let walk = &manager.config().walk;
//! println!("min points {}, expiring before {}", walk.min_points, walk.expiration);
//! # Ok(())
//! # }
//! ```
//!
//! Nothing here is global: the loaded [`WalkerConfig`] is handed to the walker's
//! constructor and the expiration horizon travels with it.

pub mod error;
pub mod loader;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// Points a species needs before models are scheduled
pub const DEFAULT_MIN_POINTS: usize = 30;

fn default_min_points() -> usize {
    DEFAULT_MIN_POINTS
}

fn default_delimiter() -> String {
    ",".to_string()
}

fn default_true() -> bool {
    true
}

fn default_latitude_column() -> String {
    "latitude".to_string()
}

fn default_longitude_column() -> String {
    "longitude".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout_seconds() -> u64 {
    30
}

/// Root configuration for one archive walk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkerConfig {
    pub archive: ArchiveConfig,
    pub datasource: SourceDescriptor,
    pub walk: WalkConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub taxonomy: TaxonomyConfig,
    pub sdm: SdmConfig,
    #[serde(default)]
    pub intersect: Option<IntersectConfig>,
    #[serde(default)]
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Owner of every entity the walk creates
    pub user_id: String,
    pub name: String,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkConfig {
    /// Completed work older than this is recomputed
    pub expiration: DateTime<Utc>,
    #[serde(default = "default_min_points")]
    pub min_points: usize,
    pub checkpoint_path: PathBuf,
    /// Bound on taxa processed per `start_walk` call; unbounded when absent
    #[serde(default)]
    pub max_taxa_per_tick: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_root: PathBuf,
    pub spool_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaxonomyConfig {
    /// Registered authority name; user-supplied names are used when absent
    #[serde(default)]
    pub source_name: Option<String>,
    /// Pre-resolved authority dump served by the static resolver
    #[serde(default)]
    pub dump_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgorithmConfig {
    pub code: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SdmConfig {
    pub algorithms: Vec<AlgorithmConfig>,
    pub model_scenario: String,
    #[serde(default)]
    pub projection_scenarios: Vec<String>,
    #[serde(default)]
    pub mask_layer: Option<String>,
}

impl SdmConfig {
    /// Projection scenarios in configured order, with the model scenario
    /// appended when it was not listed
    pub fn all_projection_scenarios(&self) -> Vec<String> {
        let mut scenarios = self.projection_scenarios.clone();
        if !scenarios.iter().any(|s| s == &self.model_scenario) {
            scenarios.push(self.model_scenario.clone());
        }
        scenarios
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntersectConfig {
    pub shapegrid: String,
    #[serde(default)]
    pub filter_string: Option<String>,
    pub value_name: String,
    pub min_presence: f64,
    pub max_presence: f64,
    pub min_percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout_seconds")]
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
            acquire_timeout_seconds: default_acquire_timeout_seconds(),
        }
    }
}

/// Column names resolved against a table header at open time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnNames {
    pub group_by: String,
    pub latitude: String,
    pub longitude: String,
    #[serde(default)]
    pub unique_id: Option<String>,
    #[serde(default)]
    pub taxon_name: Option<String>,
}

/// Coordinate columns of per-taxon files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinateColumns {
    #[serde(default = "default_latitude_column")]
    pub latitude: String,
    #[serde(default = "default_longitude_column")]
    pub longitude: String,
    #[serde(default)]
    pub unique_id: Option<String>,
    /// Header assumed for files written without one
    #[serde(default)]
    pub header: Option<Vec<String>>,
}

impl Default for CoordinateColumns {
    fn default() -> Self {
        Self {
            latitude: default_latitude_column(),
            longitude: default_longitude_column(),
            unique_id: None,
            header: None,
        }
    }
}

/// Which species input to walk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceDescriptor {
    /// One delimited table grouped by a column
    UserTable {
        path: PathBuf,
        #[serde(default = "default_delimiter")]
        delimiter: String,
        columns: ColumnNames,
        /// Group values are taxonomy authority keys rather than names
        #[serde(default)]
        group_key_is_source_key: bool,
    },
    /// One delimited file per taxon
    TaxonFileSet {
        directory: PathBuf,
        manifest_path: PathBuf,
        #[serde(default = "default_delimiter")]
        delimiter: String,
        #[serde(default = "default_true")]
        has_header: bool,
        #[serde(default)]
        columns: CoordinateColumns,
    },
    /// Ids of occurrence sets already in the catalog
    ExistingIds { path: PathBuf },
}

impl SourceDescriptor {
    /// Identifier recorded in checkpoints
    pub fn input_id(&self) -> String {
        self.input_path().display().to_string()
    }

    pub fn input_path(&self) -> &Path {
        match self {
            Self::UserTable { path, .. } | Self::ExistingIds { path } => path,
            Self::TaxonFileSet { directory, .. } => directory,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::UserTable { .. } => "user_table",
            Self::TaxonFileSet { .. } => "taxon_file_set",
            Self::ExistingIds { .. } => "existing_ids",
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        match self {
            Self::UserTable {
                delimiter, columns, ..
            } => {
                parse_delimiter(delimiter)?;
                for (field, value) in [
                    ("datasource.columns.group_by", &columns.group_by),
                    ("datasource.columns.latitude", &columns.latitude),
                    ("datasource.columns.longitude", &columns.longitude),
                ] {
                    if value.trim().is_empty() {
                        return Err(ConfigurationError::missing_required_field(
                            field,
                            "user table column roles",
                        ));
                    }
                }
                Ok(())
            }
            Self::TaxonFileSet {
                delimiter,
                has_header,
                columns,
                ..
            } => {
                parse_delimiter(delimiter)?;
                match &columns.header {
                    Some(header) => {
                        for name in [&columns.latitude, &columns.longitude] {
                            if !header.contains(name) {
                                return Err(ConfigurationError::invalid_value(
                                    "datasource.columns.header",
                                    header.join(","),
                                    format!("does not name column '{name}'"),
                                ));
                            }
                        }
                        Ok(())
                    }
                    None if !has_header => Err(ConfigurationError::missing_required_field(
                        "datasource.columns.header",
                        "taxon files without a header line",
                    )),
                    None => Ok(()),
                }
            }
            Self::ExistingIds { .. } => Ok(()),
        }
    }
}

/// Single ASCII field delimiter; `\t` is accepted as an escape
pub fn parse_delimiter(value: &str) -> ConfigResult<u8> {
    if value == "\\t" {
        return Ok(b'\t');
    }
    match value.as_bytes() {
        [byte] if byte.is_ascii() => Ok(*byte),
        _ => Err(ConfigurationError::invalid_value(
            "datasource.delimiter",
            value,
            "delimiter must be a single ASCII character",
        )),
    }
}

impl WalkerConfig {
    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> ConfigResult<()> {
        if self.archive.user_id.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "archive.user_id",
                "archive",
            ));
        }
        if self.archive.name.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "archive.name",
                "archive",
            ));
        }

        self.datasource.validate()?;

        if self.walk.max_taxa_per_tick == Some(0) {
            return Err(ConfigurationError::invalid_value(
                "walk.max_taxa_per_tick",
                "0",
                "must be positive when set",
            ));
        }

        if self.sdm.algorithms.is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "sdm.algorithms",
                "sdm",
            ));
        }
        if let Some(algorithm) = self.sdm.algorithms.iter().find(|a| a.code.trim().is_empty()) {
            return Err(ConfigurationError::invalid_value(
                "sdm.algorithms.code",
                algorithm.code.clone(),
                "algorithm code must not be empty",
            ));
        }
        if self.sdm.model_scenario.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                "sdm.model_scenario",
                "sdm",
            ));
        }

        if let Some(intersect) = &self.intersect {
            if intersect.min_presence > intersect.max_presence {
                return Err(ConfigurationError::invalid_value(
                    "intersect.min_presence",
                    intersect.min_presence.to_string(),
                    format!("exceeds max_presence {}", intersect.max_presence),
                ));
            }
            if !(0.0..=100.0).contains(&intersect.min_percent) {
                return Err(ConfigurationError::invalid_value(
                    "intersect.min_percent",
                    intersect.min_percent.to_string(),
                    "must be between 0 and 100",
                ));
            }
        }

        if self.database.max_connections == 0 {
            return Err(ConfigurationError::invalid_value(
                "database.max_connections",
                "0",
                "pool needs at least one connection",
            ));
        }

        Ok(())
    }
}
