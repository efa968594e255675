//! In-memory catalog with the same uniqueness rules as the PostgreSQL schema.

use super::{Catalog, CatalogError, CatalogResult};
use crate::models::{
    compute_squid, NewOccurrence, NewTaxon, OccurrenceEntity, OccurrenceStatusUpdate,
    TaxonEntity,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct Tables {
    next_taxon_id: i64,
    next_occurrence_id: i64,
    next_source_id: i32,
    sources: HashMap<String, i32>,
    taxa: HashMap<i64, TaxonEntity>,
    taxon_by_squid: HashMap<String, i64>,
    occurrences: HashMap<i64, OccurrenceEntity>,
    occurrence_by_owner: HashMap<(String, i64), i64>,
}

/// Catalog held in process memory.
///
/// Every find-or-insert runs inside one critical section, which gives the same
/// "conflict returns the existing row" behavior as the SQL upserts.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    tables: Mutex<Tables>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a taxonomy authority, returning its id
    pub fn seed_taxon_source(&self, name: &str) -> i32 {
        let mut tables = self.tables.lock();
        if let Some(id) = tables.sources.get(name) {
            return *id;
        }
        tables.next_source_id += 1;
        let id = tables.next_source_id;
        tables.sources.insert(name.to_string(), id);
        id
    }

    /// Insert an occurrence set with an explicit owner and state, as another
    /// user's earlier walk would have left it
    pub fn insert_occurrence_for_owner(&self, occurrence: NewOccurrence) -> OccurrenceEntity {
        let mut tables = self.tables.lock();
        Self::insert_occurrence_locked(&mut tables, occurrence)
    }

    pub fn taxon_count(&self) -> usize {
        self.tables.lock().taxa.len()
    }

    pub fn occurrence_count(&self) -> usize {
        self.tables.lock().occurrences.len()
    }

    /// Snapshot of all occurrence sets ordered by id
    pub fn occurrences(&self) -> Vec<OccurrenceEntity> {
        let tables = self.tables.lock();
        let mut all: Vec<_> = tables.occurrences.values().cloned().collect();
        all.sort_by_key(|o| o.occurrence_id);
        all
    }

    fn insert_occurrence_locked(tables: &mut Tables, occurrence: NewOccurrence) -> OccurrenceEntity {
        let owner_key = (occurrence.user_id.clone(), occurrence.taxon_id);
        if let Some(existing) = tables
            .occurrence_by_owner
            .get(&owner_key)
            .and_then(|id| tables.occurrences.get(id))
        {
            return existing.clone();
        }

        tables.next_occurrence_id += 1;
        let entity = OccurrenceEntity {
            occurrence_id: tables.next_occurrence_id,
            display_name: occurrence.display_name,
            user_id: occurrence.user_id,
            taxon_id: occurrence.taxon_id,
            squid: occurrence.squid,
            record_count: occurrence.record_count,
            status: occurrence.status,
            status_mod_time: occurrence.status_mod_time,
            raw_dlocation: None,
            dlocation: None,
        };
        tables
            .occurrence_by_owner
            .insert(owner_key, entity.occurrence_id);
        tables
            .occurrences
            .insert(entity.occurrence_id, entity.clone());
        entity
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn find_taxon_source(&self, name: &str) -> CatalogResult<Option<i32>> {
        Ok(self.tables.lock().sources.get(name).copied())
    }

    async fn find_taxon_by_source_key(
        &self,
        taxonomy_source_id: i32,
        key: &str,
    ) -> CatalogResult<Option<TaxonEntity>> {
        let tables = self.tables.lock();
        Ok(tables
            .taxa
            .values()
            .find(|t| {
                t.taxonomy_source_id == Some(taxonomy_source_id)
                    && t.taxonomy_source_key.as_deref() == Some(key)
            })
            .cloned())
    }

    async fn find_taxon_by_squid(&self, squid: &str) -> CatalogResult<Option<TaxonEntity>> {
        let tables = self.tables.lock();
        Ok(tables
            .taxon_by_squid
            .get(squid)
            .and_then(|id| tables.taxa.get(id))
            .cloned())
    }

    async fn find_or_insert_taxon(&self, taxon: NewTaxon) -> CatalogResult<TaxonEntity> {
        let squid = compute_squid(&taxon.identity);
        let mut tables = self.tables.lock();
        if let Some(existing) = tables
            .taxon_by_squid
            .get(&squid)
            .and_then(|id| tables.taxa.get(id))
        {
            return Ok(existing.clone());
        }

        let (user_id, taxonomy_source_id, taxonomy_source_key) = match &taxon.identity {
            crate::models::TaxonIdentity::Authority { source_id, key } => {
                (None, Some(*source_id), Some(key.clone()))
            }
            crate::models::TaxonIdentity::User { user_id, .. } => {
                (Some(user_id.clone()), None, None)
            }
        };
        tables.next_taxon_id += 1;
        let entity = TaxonEntity {
            taxon_id: tables.next_taxon_id,
            user_id,
            taxonomy_source_id,
            taxonomy_source_key,
            squid: squid.clone(),
            scientific_name: taxon.scientific_name,
            canonical_name: taxon.canonical_name,
            rank: taxon.rank,
            kingdom: taxon.kingdom,
            phylum: taxon.phylum,
            taxon_class: taxon.taxon_class,
            taxon_order: taxon.taxon_order,
            family: taxon.family,
            genus: taxon.genus,
            last_occurrence_count: taxon.last_occurrence_count,
            mod_time: Utc::now(),
        };
        tables.taxon_by_squid.insert(squid, entity.taxon_id);
        tables.taxa.insert(entity.taxon_id, entity.clone());
        Ok(entity)
    }

    async fn refresh_taxon_count(
        &self,
        taxon_id: i64,
        last_occurrence_count: i64,
        mod_time: DateTime<Utc>,
    ) -> CatalogResult<()> {
        let mut tables = self.tables.lock();
        let taxon = tables
            .taxa
            .get_mut(&taxon_id)
            .ok_or_else(|| CatalogError::NotFound(format!("taxon {taxon_id}")))?;
        taxon.last_occurrence_count = last_occurrence_count;
        taxon.mod_time = taxon.mod_time.max(mod_time);
        Ok(())
    }

    async fn get_occurrence(&self, occurrence_id: i64) -> CatalogResult<Option<OccurrenceEntity>> {
        Ok(self.tables.lock().occurrences.get(&occurrence_id).cloned())
    }

    async fn find_occurrence_for_taxon(
        &self,
        user_id: &str,
        taxon_id: i64,
    ) -> CatalogResult<Option<OccurrenceEntity>> {
        let tables = self.tables.lock();
        Ok(tables
            .occurrence_by_owner
            .get(&(user_id.to_string(), taxon_id))
            .and_then(|id| tables.occurrences.get(id))
            .cloned())
    }

    async fn find_or_insert_occurrence(
        &self,
        occurrence: NewOccurrence,
    ) -> CatalogResult<OccurrenceEntity> {
        let mut tables = self.tables.lock();
        if !tables.taxa.contains_key(&occurrence.taxon_id) {
            return Err(CatalogError::NotFound(format!(
                "taxon {} for occurrence set {}",
                occurrence.taxon_id, occurrence.display_name
            )));
        }
        Ok(Self::insert_occurrence_locked(&mut tables, occurrence))
    }

    async fn update_occurrence_status(
        &self,
        update: OccurrenceStatusUpdate,
    ) -> CatalogResult<OccurrenceEntity> {
        let mut tables = self.tables.lock();
        let occurrence = tables
            .occurrences
            .get_mut(&update.occurrence_id)
            .ok_or_else(|| CatalogError::NotFound(format!("occurrence {}", update.occurrence_id)))?;
        occurrence.status = update.status;
        occurrence.status_mod_time = occurrence.status_mod_time.max(update.mod_time);
        if let Some(count) = update.record_count {
            occurrence.record_count = count;
        }
        Ok(occurrence.clone())
    }

    async fn set_occurrence_locations(
        &self,
        occurrence_id: i64,
        raw_dlocation: Option<&str>,
        dlocation: Option<&str>,
    ) -> CatalogResult<()> {
        let mut tables = self.tables.lock();
        let occurrence = tables
            .occurrences
            .get_mut(&occurrence_id)
            .ok_or_else(|| CatalogError::NotFound(format!("occurrence {occurrence_id}")))?;
        if let Some(raw) = raw_dlocation {
            occurrence.raw_dlocation = Some(raw.to_string());
        }
        if let Some(processed) = dlocation {
            occurrence.dlocation = Some(processed.to_string());
        }
        Ok(())
    }
}
