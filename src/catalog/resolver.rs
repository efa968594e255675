//! Walk-specific resolution of batches into catalog entities.

use super::Catalog;
use crate::config::ConfigurationError;
use crate::constants::JobStatus;
use crate::error::{Result, WalkerError};
use crate::locator::DataLocator;
use crate::models::{
    BatchPayload, NewOccurrence, NewTaxon, OccurrenceBatch, OccurrenceEntity,
    OccurrenceStatusUpdate, TaxonEntity, TaxonKey,
};
use crate::staleness::should_recompute;
use crate::taxonomy::TaxonomyResolver;
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct ResolverSettings {
    /// Owner of every entity created
    pub user_id: String,
    pub expiration: DateTime<Utc>,
    pub data_root: PathBuf,
    /// Taxonomy authority; names are treated as user-supplied when absent
    pub taxonomy_source_name: Option<String>,
}

/// Catalogued occurrence set for one batch, with the recompute decision
#[derive(Debug, Clone)]
pub struct ResolvedOccurrence {
    pub occurrence: OccurrenceEntity,
    pub will_compute: bool,
    pub raw_location: PathBuf,
    pub processed_location: PathBuf,
}

pub struct CatalogResolver {
    catalog: Arc<dyn Catalog>,
    taxonomy: Option<Arc<dyn TaxonomyResolver>>,
    taxonomy_source_id: Option<i32>,
    settings: ResolverSettings,
    locator: DataLocator,
}

impl std::fmt::Debug for CatalogResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogResolver")
            .field("taxonomy_source_id", &self.taxonomy_source_id)
            .field("settings", &self.settings)
            .finish()
    }
}

fn raw_write_error(location: &Path, error: impl std::fmt::Display) -> WalkerError {
    WalkerError::RawDataWrite {
        location: location.display().to_string(),
        reason: error.to_string(),
    }
}

impl CatalogResolver {
    /// Bind to a catalog, looking up the configured taxonomy authority
    pub async fn connect(
        catalog: Arc<dyn Catalog>,
        taxonomy: Option<Arc<dyn TaxonomyResolver>>,
        settings: ResolverSettings,
    ) -> Result<Self> {
        let taxonomy_source_id = match &settings.taxonomy_source_name {
            Some(name) => Some(
                catalog
                    .find_taxon_source(name)
                    .await?
                    .ok_or_else(|| ConfigurationError::UnknownTaxonomySource(name.clone()))?,
            ),
            None => None,
        };
        let locator = DataLocator::new(&settings.data_root);
        Ok(Self {
            catalog,
            taxonomy,
            taxonomy_source_id,
            settings,
            locator,
        })
    }

    pub fn settings(&self) -> &ResolverSettings {
        &self.settings
    }

    pub fn locator(&self) -> &DataLocator {
        &self.locator
    }

    /// Resolve a batch's taxon to a catalog row.
    ///
    /// `Ok(None)` means the authority does not know the key or rejected it;
    /// that is a normal outcome and the taxon is skipped.
    #[instrument(skip(self), fields(user_id = %self.settings.user_id))]
    pub async fn resolve_taxon(
        &self,
        key: &TaxonKey,
        record_count: usize,
    ) -> Result<Option<TaxonEntity>> {
        let count = i64::try_from(record_count).unwrap_or(i64::MAX);
        let resolved = match (key, self.taxonomy_source_id) {
            (TaxonKey::Squid(squid), _) => {
                return Ok(self.catalog.find_taxon_by_squid(squid).await?);
            }
            (TaxonKey::SourceKey(source_key), Some(source_id)) => {
                self.resolve_authority_key(source_id, source_key, count)
                    .await?
            }
            (TaxonKey::SourceKey(name), None) => Some(self.insert_user_taxon(name, count).await?),
            (
                TaxonKey::Name {
                    scientific_name,
                    source_key: Some(source_key),
                },
                Some(source_id),
            ) => Some(
                self.catalog
                    .find_or_insert_taxon(NewTaxon::authority_keyed(
                        source_id,
                        source_key,
                        scientific_name,
                        count,
                    ))
                    .await?,
            ),
            (TaxonKey::Name { scientific_name, .. }, _) => {
                Some(self.insert_user_taxon(scientific_name, count).await?)
            }
        };

        let Some(mut taxon) = resolved else {
            return Ok(None);
        };
        let now = Utc::now();
        self.catalog
            .refresh_taxon_count(taxon.taxon_id, count, now)
            .await?;
        taxon.last_occurrence_count = count;
        taxon.mod_time = taxon.mod_time.max(now);
        Ok(Some(taxon))
    }

    async fn insert_user_taxon(&self, scientific_name: &str, count: i64) -> Result<TaxonEntity> {
        Ok(self
            .catalog
            .find_or_insert_taxon(NewTaxon::user_supplied(
                &self.settings.user_id,
                scientific_name,
                count,
            ))
            .await?)
    }

    async fn resolve_authority_key(
        &self,
        source_id: i32,
        key: &str,
        count: i64,
    ) -> Result<Option<TaxonEntity>> {
        if let Some(existing) = self.catalog.find_taxon_by_source_key(source_id, key).await? {
            debug!(key, taxon_id = existing.taxon_id, "Taxon found in catalog");
            return Ok(Some(existing));
        }

        let Some(taxonomy) = &self.taxonomy else {
            warn!(key, "Taxon key not catalogued and no taxonomy resolver is configured");
            return Ok(None);
        };
        let Some(record) = taxonomy.resolve(key, None).await? else {
            info!(key, source = taxonomy.source_name(), "Taxon key not found by authority");
            return Ok(None);
        };
        if !record.status.is_catalogable() {
            info!(key, status = %record.status, "Taxon key is not accepted, skipping");
            return Ok(None);
        }

        let mut new_taxon =
            NewTaxon::authority_keyed(source_id, &record.source_key, &record.scientific_name, count);
        new_taxon.canonical_name = record.canonical_name;
        new_taxon.rank = record.rank;
        new_taxon.kingdom = record.kingdom;
        new_taxon.phylum = record.phylum;
        new_taxon.taxon_class = record.taxon_class;
        new_taxon.taxon_order = record.taxon_order;
        new_taxon.family = record.family;
        new_taxon.genus = record.genus;
        Ok(Some(self.catalog.find_or_insert_taxon(new_taxon).await?))
    }

    /// Catalog the batch's occurrence set, persist its raw data and decide
    /// whether it must be (re)computed.
    ///
    /// The status is left untouched; [`CatalogResolver::mark_scheduled`] moves it
    /// once the taxon's graph has been accepted by the engine.
    #[instrument(skip(self, taxon, batch), fields(squid = %taxon.squid, group_key = %batch.group_key))]
    pub async fn resolve_occurrence(
        &self,
        taxon: &TaxonEntity,
        batch: &OccurrenceBatch,
    ) -> Result<ResolvedOccurrence> {
        let now = Utc::now();
        let record_count = i64::try_from(batch.record_count).unwrap_or(i64::MAX);
        let user_id = &self.settings.user_id;

        let mut occurrence = match &batch.payload {
            BatchPayload::CatalogOwned { occurrence } => occurrence.clone(),
            BatchPayload::Rows | BatchPayload::CatalogCopy { .. } => {
                self.catalog
                    .find_or_insert_occurrence(NewOccurrence {
                        display_name: taxon.display_name().to_string(),
                        user_id: user_id.clone(),
                        taxon_id: taxon.taxon_id,
                        squid: taxon.squid.clone(),
                        record_count,
                        status: JobStatus::Uninitialized,
                        status_mod_time: now,
                    })
                    .await?
            }
        };
        let occurrence_id = occurrence.occurrence_id;

        let default_raw = self
            .locator
            .raw_data_path(&occurrence.user_id, &occurrence.squid, occurrence_id);
        let default_processed = self
            .locator
            .processed_path(&occurrence.user_id, &occurrence.squid, occurrence_id);

        let (raw_location, processed_location) = match &batch.payload {
            BatchPayload::Rows => {
                self.write_raw_rows(&default_raw, batch).await?;
                (default_raw, default_processed)
            }
            BatchPayload::CatalogCopy { source } => {
                self.copy_raw_data(source, &default_raw, batch).await?;
                (default_raw, default_processed)
            }
            BatchPayload::CatalogOwned { occurrence } => (
                occurrence
                    .raw_dlocation
                    .as_deref()
                    .map(PathBuf::from)
                    .unwrap_or(default_raw),
                occurrence
                    .dlocation
                    .as_deref()
                    .map(PathBuf::from)
                    .unwrap_or(default_processed),
            ),
        };

        let raw_str = raw_location.display().to_string();
        let processed_str = processed_location.display().to_string();
        self.catalog
            .set_occurrence_locations(occurrence_id, Some(raw_str.as_str()), Some(processed_str.as_str()))
            .await?;
        occurrence.raw_dlocation = Some(raw_str);
        occurrence.dlocation = Some(processed_str);

        let raw_exists = tokio::fs::try_exists(&raw_location).await.unwrap_or(false);
        let output_exists = tokio::fs::try_exists(&processed_location)
            .await
            .unwrap_or(false);
        let will_compute = should_recompute(
            occurrence.status,
            occurrence.status_mod_time,
            output_exists,
            raw_exists,
            self.settings.expiration,
        );

        debug!(
            occurrence_id,
            status = %occurrence.status,
            raw_exists,
            output_exists,
            will_compute,
            "Occurrence staleness evaluated"
        );

        Ok(ResolvedOccurrence {
            occurrence,
            will_compute,
            raw_location,
            processed_location,
        })
    }

    /// Record that the occurrence set's computation has been handed off
    #[instrument(skip(self))]
    pub async fn mark_scheduled(
        &self,
        occurrence_id: i64,
        record_count: usize,
    ) -> Result<OccurrenceEntity> {
        Ok(self
            .catalog
            .update_occurrence_status(OccurrenceStatusUpdate {
                occurrence_id,
                status: JobStatus::Initializing,
                mod_time: Utc::now(),
                record_count: Some(i64::try_from(record_count).unwrap_or(i64::MAX)),
            })
            .await?)
    }

    /// Write inline rows as CSV plus a JSON sidecar describing the columns
    async fn write_raw_rows(&self, raw_location: &Path, batch: &OccurrenceBatch) -> Result<()> {
        if let Some(dir) = raw_location.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| raw_write_error(dir, e))?;
        }

        let mut writer = WriterBuilder::new().flexible(true).from_writer(Vec::new());
        let header = batch.columns.as_ref().map(|c| c.header.as_slice());
        for row in header.into_iter().chain(batch.rows.iter().map(Vec::as_slice)) {
            writer
                .write_record(row)
                .map_err(|e| raw_write_error(raw_location, e))?;
        }
        let body = writer
            .into_inner()
            .map_err(|e| raw_write_error(raw_location, e.error()))?;
        tokio::fs::write(raw_location, body)
            .await
            .map_err(|e| raw_write_error(raw_location, e))?;

        let sidecar = raw_location.with_extension("json");
        let metadata = serde_json::json!({
            "group_key": batch.group_key,
            "record_count": batch.record_count,
            "first_record": batch.first_record,
            "columns": batch.columns,
        });
        let metadata = serde_json::to_vec_pretty(&metadata).map_err(|e| raw_write_error(&sidecar, e))?;
        tokio::fs::write(&sidecar, metadata)
            .await
            .map_err(|e| raw_write_error(&sidecar, e))?;
        Ok(())
    }

    /// Materialize a private copy of a public occurrence set's raw data
    async fn copy_raw_data(
        &self,
        source: &OccurrenceEntity,
        raw_location: &Path,
        batch: &OccurrenceBatch,
    ) -> Result<()> {
        let Some(source_raw) = source.raw_dlocation.as_deref() else {
            return Err(WalkerError::InvalidData {
                group_key: batch.group_key.clone(),
                reason: format!("public occurrence set {} has no raw data", source.occurrence_id),
            });
        };
        if let Some(dir) = raw_location.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| raw_write_error(dir, e))?;
        }
        match tokio::fs::copy(source_raw, raw_location).await {
            Ok(bytes) => {
                debug!(from = source_raw, to = %raw_location.display(), bytes, "Copied public raw data");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(WalkerError::InvalidData {
                group_key: batch.group_key.clone(),
                reason: format!("raw data {source_raw} of public occurrence set is missing"),
            }),
            Err(e) => Err(raw_write_error(raw_location, e)),
        }
    }
}
