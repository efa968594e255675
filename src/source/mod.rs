//! # Species Data Sources
//!
//! Sequential producers of [`OccurrenceBatch`]es, one per taxon, with
//! resumable integer positions.
//!
//! Positions count data records (header excluded) already consumed.
//! `resume_from(n)` makes record `n + 1` the next one read, and
//! `current_position()` never includes a look-ahead record that belongs to a
//! batch not yet returned. Malformed records are skipped with a warning but
//! still advance the position.
//!
//! [`SpeciesSource`] is the closed set of supported inputs; the walker only
//! talks to it through [`OccurrenceSource`].

pub mod existing_ids;
mod line_reader;
pub mod taxon_file_set;
pub mod user_table;

pub use existing_ids::ExistingIdsSource;
pub use taxon_file_set::TaxonFileSetSource;
pub use user_table::UserTableSource;

use crate::catalog::{Catalog, CatalogError};
use crate::config::{parse_delimiter, ConfigurationError, SourceDescriptor};
use crate::error::ErrorClass;
use crate::models::{ColumnRoles, OccurrenceBatch};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Unreadable delimited input {path}: {source}")]
    Csv {
        path: String,
        #[source]
        source: csv::Error,
    },
    #[error("Invalid source configuration: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Catalog lookup failed: {0}")]
    Catalog(#[from] CatalogError),
}

impl SourceError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// I/O failures inside the reader keep their `std::io::Error`
    pub fn csv(path: &Path, source: csv::Error) -> Self {
        if source.is_io_error() {
            if let csv::ErrorKind::Io(io) = source.into_kind() {
                return Self::io(path, io);
            }
            return Self::io(path, std::io::Error::other("csv reader I/O failure"));
        }
        Self::Csv {
            path: path.display().to_string(),
            source,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Io { .. } | Self::Csv { .. } => ErrorClass::Persistence,
            Self::Configuration(_) => ErrorClass::Configuration,
            Self::Catalog(err) => err.class(),
        }
    }
}

pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// Check a record against its column roles; the reason is logged when it is skipped
pub(crate) fn check_record(columns: &ColumnRoles, fields: &[String]) -> Result<(), String> {
    if fields.len() != columns.width() {
        return Err(format!(
            "expected {} fields, found {}",
            columns.width(),
            fields.len()
        ));
    }
    if columns.group_by.is_some_and(|idx| fields[idx].is_empty()) {
        return Err("empty group value".to_string());
    }
    let lat = fields[columns.latitude]
        .parse::<f64>()
        .map_err(|_| format!("non-numeric latitude '{}'", fields[columns.latitude]))?;
    let lon = fields[columns.longitude]
        .parse::<f64>()
        .map_err(|_| format!("non-numeric longitude '{}'", fields[columns.longitude]))?;
    if lat == 0.0 && lon == 0.0 {
        return Err("coordinates are 0, 0".to_string());
    }
    Ok(())
}

/// A resumable sequence of per-taxon batches
#[async_trait]
pub trait OccurrenceSource: Send {
    /// Next batch, or `None` once the input is exhausted
    async fn pull_next(&mut self) -> SourceResult<Option<OccurrenceBatch>>;

    /// Data records consumed so far, excluding any look-ahead record
    fn current_position(&self) -> u64;

    /// Position the source so record `offset + 1` is read next
    async fn resume_from(&mut self, offset: u64) -> SourceResult<()>;

    /// Release file handles; further pulls return `None`
    fn close(&mut self);

    /// Identifier of the input, recorded alongside checkpoints
    fn input_id(&self) -> &str;

    fn is_exhausted(&self) -> bool;
}

/// What every source may need besides its descriptor
#[derive(Clone)]
pub struct SourceContext {
    pub user_id: String,
    pub catalog: Arc<dyn Catalog>,
    pub expiration: DateTime<Utc>,
}

impl std::fmt::Debug for SourceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceContext")
            .field("user_id", &self.user_id)
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// The supported species inputs
#[derive(Debug)]
pub enum SpeciesSource {
    UserTable(UserTableSource),
    TaxonFileSet(TaxonFileSetSource),
    ExistingIds(ExistingIdsSource),
}

impl SpeciesSource {
    /// Open the input a descriptor names, positioned at its first record
    pub async fn open(descriptor: &SourceDescriptor, context: &SourceContext) -> SourceResult<Self> {
        match descriptor {
            SourceDescriptor::UserTable {
                path,
                delimiter,
                columns,
                group_key_is_source_key,
            } => Ok(Self::UserTable(UserTableSource::open(
                path,
                parse_delimiter(delimiter)?,
                columns,
                *group_key_is_source_key,
            )?)),
            SourceDescriptor::TaxonFileSet {
                directory,
                manifest_path,
                delimiter,
                has_header,
                columns,
            } => Ok(Self::TaxonFileSet(TaxonFileSetSource::open(
                directory,
                manifest_path,
                parse_delimiter(delimiter)?,
                *has_header,
                columns,
                context.expiration,
            )?)),
            SourceDescriptor::ExistingIds { path } => Ok(Self::ExistingIds(
                ExistingIdsSource::open(path, &context.user_id, context.catalog.clone())?,
            )),
        }
    }

    fn inner(&self) -> &dyn OccurrenceSource {
        match self {
            Self::UserTable(source) => source,
            Self::TaxonFileSet(source) => source,
            Self::ExistingIds(source) => source,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn OccurrenceSource {
        match self {
            Self::UserTable(source) => source,
            Self::TaxonFileSet(source) => source,
            Self::ExistingIds(source) => source,
        }
    }
}

#[async_trait]
impl OccurrenceSource for SpeciesSource {
    async fn pull_next(&mut self) -> SourceResult<Option<OccurrenceBatch>> {
        self.inner_mut().pull_next().await
    }

    fn current_position(&self) -> u64 {
        self.inner().current_position()
    }

    async fn resume_from(&mut self, offset: u64) -> SourceResult<()> {
        self.inner_mut().resume_from(offset).await
    }

    fn close(&mut self) {
        self.inner_mut().close()
    }

    fn input_id(&self) -> &str {
        self.inner().input_id()
    }

    fn is_exhausted(&self) -> bool {
        self.inner().is_exhausted()
    }
}
