//! # Persistent Catalog
//!
//! Idempotent find-or-insert access to taxa and occurrence sets.
//!
//! ## Implementations
//!
//! - [`PgCatalog`]: PostgreSQL via SQLx; every find-or-insert is one
//!   `INSERT .. ON CONFLICT .. DO UPDATE .. RETURNING` statement so concurrent
//!   walkers converge on the existing row instead of racing a check-then-insert.
//! - [`InMemoryCatalog`]: same contract behind a single mutex, for embedded runs
//!   and tests.
//!
//! [`CatalogResolver`] layers the walk-specific resolution rules (taxonomy
//! authority lookups, raw-data persistence, staleness) on top of a [`Catalog`].

pub mod memory;
pub mod postgres;
pub mod resolver;

pub use memory::InMemoryCatalog;
pub use postgres::PgCatalog;
pub use resolver::{CatalogResolver, ResolvedOccurrence, ResolverSettings};

use crate::error::ErrorClass;
use crate::models::{
    NewOccurrence, NewTaxon, OccurrenceEntity, OccurrenceStatusUpdate, TaxonEntity,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

/// PostgreSQL `query_canceled`, raised when `statement_timeout` fires
const PG_QUERY_CANCELED: &str = "57014";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("Catalog timed out: {0}")]
    Timeout(String),
    #[error("Record not found: {0}")]
    NotFound(String),
}

impl CatalogError {
    /// Timeouts skip the taxon; anything else means the catalog is unusable
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout(_) => ErrorClass::TransientExternal,
            Self::Database(sqlx::Error::PoolTimedOut) => ErrorClass::TransientExternal,
            Self::Database(sqlx::Error::Database(db_err))
                if db_err.code().as_deref() == Some(PG_QUERY_CANCELED) =>
            {
                ErrorClass::TransientExternal
            }
            Self::NotFound(_) => ErrorClass::Data,
            Self::Database(_) | Self::Migration(_) => ErrorClass::Persistence,
        }
    }
}

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

/// Persistent catalog of taxa and occurrence sets
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Id of a registered taxonomy authority
    async fn find_taxon_source(&self, name: &str) -> CatalogResult<Option<i32>>;

    async fn find_taxon_by_source_key(
        &self,
        taxonomy_source_id: i32,
        key: &str,
    ) -> CatalogResult<Option<TaxonEntity>>;

    async fn find_taxon_by_squid(&self, squid: &str) -> CatalogResult<Option<TaxonEntity>>;

    /// Insert the taxon, or return the row already holding its identity
    async fn find_or_insert_taxon(&self, taxon: NewTaxon) -> CatalogResult<TaxonEntity>;

    /// Refresh the only mutable taxon attributes
    async fn refresh_taxon_count(
        &self,
        taxon_id: i64,
        last_occurrence_count: i64,
        mod_time: DateTime<Utc>,
    ) -> CatalogResult<()>;

    async fn get_occurrence(&self, occurrence_id: i64) -> CatalogResult<Option<OccurrenceEntity>>;

    async fn find_occurrence_for_taxon(
        &self,
        user_id: &str,
        taxon_id: i64,
    ) -> CatalogResult<Option<OccurrenceEntity>>;

    /// Insert the occurrence set, or return the row already held by (user, taxon)
    async fn find_or_insert_occurrence(
        &self,
        occurrence: NewOccurrence,
    ) -> CatalogResult<OccurrenceEntity>;

    /// Apply a status change; the stored status time never moves backwards
    async fn update_occurrence_status(
        &self,
        update: OccurrenceStatusUpdate,
    ) -> CatalogResult<OccurrenceEntity>;

    async fn set_occurrence_locations(
        &self,
        occurrence_id: i64,
        raw_dlocation: Option<&str>,
        dlocation: Option<&str>,
    ) -> CatalogResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_error_classes() {
        assert_eq!(
            CatalogError::Timeout("statement".into()).class(),
            ErrorClass::TransientExternal
        );
        assert_eq!(
            CatalogError::Database(sqlx::Error::PoolTimedOut).class(),
            ErrorClass::TransientExternal
        );
        assert_eq!(
            CatalogError::Database(sqlx::Error::PoolClosed).class(),
            ErrorClass::Persistence
        );
        assert_eq!(
            CatalogError::NotFound("occurrence 7".into()).class(),
            ErrorClass::Data
        );
    }
}
