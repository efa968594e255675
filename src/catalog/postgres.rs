//! PostgreSQL catalog.
//!
//! Maps to `boom_taxonomy_sources`, `boom_taxa` and `boom_occurrence_sets`
//! (see `migrations/`). Queries are checked at runtime so the crate builds
//! without a live database.

use super::{Catalog, CatalogError, CatalogResult};
use crate::constants::JobStatus;
use crate::models::{
    NewOccurrence, NewTaxon, OccurrenceEntity, OccurrenceStatusUpdate, TaxonEntity, TaxonIdentity,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use std::time::Duration;
use tracing::{debug, instrument};

const PG_UNIQUE_VIOLATION: &str = "23505";
const PG_FOREIGN_KEY_VIOLATION: &str = "23503";

const TAXON_COLUMNS: &str = "taxon_id, user_id, taxonomy_source_id, taxonomy_source_key, squid, \
     scientific_name, canonical_name, rank, kingdom, phylum, taxon_class, taxon_order, family, \
     genus, last_occurrence_count, mod_time";

const OCCURRENCE_COLUMNS: &str = "occurrence_id, display_name, user_id, taxon_id, squid, \
     record_count, status_code, status_mod_time, raw_dlocation, dlocation";

/// Row shape of `boom_occurrence_sets`; the status is stored as its integer code
#[derive(Debug, FromRow)]
struct OccurrenceRow {
    occurrence_id: i64,
    display_name: String,
    user_id: String,
    taxon_id: i64,
    squid: String,
    record_count: i64,
    status_code: i32,
    status_mod_time: DateTime<Utc>,
    raw_dlocation: Option<String>,
    dlocation: Option<String>,
}

impl From<OccurrenceRow> for OccurrenceEntity {
    fn from(row: OccurrenceRow) -> Self {
        Self {
            occurrence_id: row.occurrence_id,
            display_name: row.display_name,
            user_id: row.user_id,
            taxon_id: row.taxon_id,
            squid: row.squid,
            record_count: row.record_count,
            status: JobStatus::from_code(row.status_code),
            status_mod_time: row.status_mod_time,
            raw_dlocation: row.raw_dlocation,
            dlocation: row.dlocation,
        }
    }
}

fn is_violation(err: &sqlx::Error, code: &str) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(code))
}

#[derive(Debug, Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> CatalogResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations
    pub async fn migrate(&self) -> CatalogResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Register a taxonomy authority, returning its id
    pub async fn register_taxon_source(&self, name: &str, url: Option<&str>) -> CatalogResult<i32> {
        let id = sqlx::query_scalar::<_, i32>(
            r#"
            INSERT INTO boom_taxonomy_sources (name, url)
            VALUES ($1, $2)
            ON CONFLICT (name) DO UPDATE SET name = boom_taxonomy_sources.name
            RETURNING taxonomy_source_id
            "#,
        )
        .bind(name)
        .bind(url)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }
}

#[async_trait]
impl Catalog for PgCatalog {
    async fn find_taxon_source(&self, name: &str) -> CatalogResult<Option<i32>> {
        let id = sqlx::query_scalar::<_, i32>(
            "SELECT taxonomy_source_id FROM boom_taxonomy_sources WHERE name = $1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn find_taxon_by_source_key(
        &self,
        taxonomy_source_id: i32,
        key: &str,
    ) -> CatalogResult<Option<TaxonEntity>> {
        let taxon = sqlx::query_as::<_, TaxonEntity>(&format!(
            "SELECT {TAXON_COLUMNS} FROM boom_taxa \
             WHERE taxonomy_source_id = $1 AND taxonomy_source_key = $2"
        ))
        .bind(taxonomy_source_id)
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;
        Ok(taxon)
    }

    async fn find_taxon_by_squid(&self, squid: &str) -> CatalogResult<Option<TaxonEntity>> {
        let taxon = sqlx::query_as::<_, TaxonEntity>(&format!(
            "SELECT {TAXON_COLUMNS} FROM boom_taxa WHERE squid = $1"
        ))
        .bind(squid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(taxon)
    }

    #[instrument(skip(self, taxon), fields(name = %taxon.scientific_name))]
    async fn find_or_insert_taxon(&self, taxon: NewTaxon) -> CatalogResult<TaxonEntity> {
        let squid = taxon.squid();
        let (user_id, source_id, source_key) = match &taxon.identity {
            TaxonIdentity::Authority { source_id, key } => (None, Some(*source_id), Some(key.as_str())),
            TaxonIdentity::User { user_id, .. } => (Some(user_id.as_str()), None, None),
        };

        let inserted = sqlx::query_as::<_, TaxonEntity>(&format!(
            r#"
            INSERT INTO boom_taxa (user_id, taxonomy_source_id, taxonomy_source_key, squid,
                scientific_name, canonical_name, rank, kingdom, phylum, taxon_class,
                taxon_order, family, genus, last_occurrence_count, mod_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, NOW())
            ON CONFLICT (squid) DO UPDATE SET squid = boom_taxa.squid
            RETURNING {TAXON_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(source_id)
        .bind(source_key)
        .bind(&squid)
        .bind(&taxon.scientific_name)
        .bind(&taxon.canonical_name)
        .bind(&taxon.rank)
        .bind(&taxon.kingdom)
        .bind(&taxon.phylum)
        .bind(&taxon.taxon_class)
        .bind(&taxon.taxon_order)
        .bind(&taxon.family)
        .bind(&taxon.genus)
        .bind(taxon.last_occurrence_count)
        .fetch_one(&self.pool)
        .await;

        match inserted {
            Ok(entity) => {
                debug!(taxon_id = entity.taxon_id, squid = %entity.squid, "Taxon resolved");
                Ok(entity)
            }
            Err(ref e) if is_violation(e, PG_UNIQUE_VIOLATION) => {
                // Lost a race on one of the partial identity indexes
                self.find_taxon_by_squid(&squid)
                    .await?
                    .ok_or_else(|| CatalogError::NotFound(format!("taxon {squid}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn refresh_taxon_count(
        &self,
        taxon_id: i64,
        last_occurrence_count: i64,
        mod_time: DateTime<Utc>,
    ) -> CatalogResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE boom_taxa
            SET last_occurrence_count = $2, mod_time = GREATEST(mod_time, $3)
            WHERE taxon_id = $1
            "#,
        )
        .bind(taxon_id)
        .bind(last_occurrence_count)
        .bind(mod_time)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound(format!("taxon {taxon_id}")));
        }
        Ok(())
    }

    async fn get_occurrence(&self, occurrence_id: i64) -> CatalogResult<Option<OccurrenceEntity>> {
        let row = sqlx::query_as::<_, OccurrenceRow>(&format!(
            "SELECT {OCCURRENCE_COLUMNS} FROM boom_occurrence_sets WHERE occurrence_id = $1"
        ))
        .bind(occurrence_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    async fn find_occurrence_for_taxon(
        &self,
        user_id: &str,
        taxon_id: i64,
    ) -> CatalogResult<Option<OccurrenceEntity>> {
        let row = sqlx::query_as::<_, OccurrenceRow>(&format!(
            "SELECT {OCCURRENCE_COLUMNS} FROM boom_occurrence_sets \
             WHERE user_id = $1 AND taxon_id = $2"
        ))
        .bind(user_id)
        .bind(taxon_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Into::into))
    }

    #[instrument(skip(self, occurrence), fields(user_id = %occurrence.user_id, taxon_id = occurrence.taxon_id))]
    async fn find_or_insert_occurrence(
        &self,
        occurrence: NewOccurrence,
    ) -> CatalogResult<OccurrenceEntity> {
        let row = sqlx::query_as::<_, OccurrenceRow>(&format!(
            r#"
            INSERT INTO boom_occurrence_sets (user_id, taxon_id, squid, display_name,
                record_count, status_code, status_mod_time)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (user_id, taxon_id) DO UPDATE SET user_id = boom_occurrence_sets.user_id
            RETURNING {OCCURRENCE_COLUMNS}
            "#
        ))
        .bind(&occurrence.user_id)
        .bind(occurrence.taxon_id)
        .bind(&occurrence.squid)
        .bind(&occurrence.display_name)
        .bind(occurrence.record_count)
        .bind(occurrence.status.code())
        .bind(occurrence.status_mod_time)
        .fetch_one(&self.pool)
        .await;

        match row {
            Ok(row) => Ok(row.into()),
            Err(ref e) if is_violation(e, PG_FOREIGN_KEY_VIOLATION) => Err(CatalogError::NotFound(
                format!("taxon {} for occurrence set {}", occurrence.taxon_id, occurrence.display_name),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn update_occurrence_status(
        &self,
        update: OccurrenceStatusUpdate,
    ) -> CatalogResult<OccurrenceEntity> {
        let row = sqlx::query_as::<_, OccurrenceRow>(&format!(
            r#"
            UPDATE boom_occurrence_sets
            SET status_code = $2,
                status_mod_time = GREATEST(status_mod_time, $3),
                record_count = COALESCE($4, record_count)
            WHERE occurrence_id = $1
            RETURNING {OCCURRENCE_COLUMNS}
            "#
        ))
        .bind(update.occurrence_id)
        .bind(update.status.code())
        .bind(update.mod_time)
        .bind(update.record_count)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Into::into)
            .ok_or_else(|| CatalogError::NotFound(format!("occurrence {}", update.occurrence_id)))
    }

    async fn set_occurrence_locations(
        &self,
        occurrence_id: i64,
        raw_dlocation: Option<&str>,
        dlocation: Option<&str>,
    ) -> CatalogResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE boom_occurrence_sets
            SET raw_dlocation = COALESCE($2, raw_dlocation),
                dlocation = COALESCE($3, dlocation)
            WHERE occurrence_id = $1
            "#,
        )
        .bind(occurrence_id)
        .bind(raw_dlocation)
        .bind(dlocation)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(CatalogError::NotFound(format!("occurrence {occurrence_id}")));
        }
        Ok(())
    }
}
