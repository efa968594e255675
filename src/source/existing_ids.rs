//! Flat file of occurrence-set ids already held by the catalog.

use super::line_reader::LineReader;
use super::{OccurrenceSource, SourceResult};
use crate::catalog::Catalog;
use crate::constants::PUBLIC_USER;
use crate::models::OccurrenceBatch;
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ExistingIdsSource {
    reader: LineReader,
    user_id: String,
    catalog: Arc<dyn Catalog>,
    input_id: String,
    exhausted: bool,
}

impl fmt::Debug for ExistingIdsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExistingIdsSource")
            .field("input_id", &self.input_id)
            .field("user_id", &self.user_id)
            .field("position", &self.reader.position())
            .field("exhausted", &self.exhausted)
            .finish()
    }
}

impl ExistingIdsSource {
    pub fn open(path: &Path, user_id: &str, catalog: Arc<dyn Catalog>) -> SourceResult<Self> {
        Ok(Self {
            reader: LineReader::open(path, b',', false)?,
            user_id: user_id.to_string(),
            catalog,
            input_id: path.display().to_string(),
            exhausted: false,
        })
    }
}

#[async_trait]
impl OccurrenceSource for ExistingIdsSource {
    async fn pull_next(&mut self) -> SourceResult<Option<OccurrenceBatch>> {
        while let Some(fields) = self.reader.next_record()? {
            let record = self.reader.position();
            let value = fields.first().map(String::as_str).unwrap_or_default();
            let Ok(occurrence_id) = value.parse::<i64>() else {
                warn!(input = %self.input_id, record, value, "Skipping unparseable occurrence id");
                continue;
            };

            let Some(occurrence) = self.catalog.get_occurrence(occurrence_id).await? else {
                warn!(input = %self.input_id, record, occurrence_id, "Occurrence set not found in catalog");
                continue;
            };

            if occurrence.is_owned_by(&self.user_id) {
                debug!(occurrence_id, "Walking owned occurrence set");
                return Ok(Some(OccurrenceBatch::from_catalog(occurrence, false, record)));
            }
            if occurrence.is_owned_by(PUBLIC_USER) {
                debug!(occurrence_id, "Copying public occurrence set");
                return Ok(Some(OccurrenceBatch::from_catalog(occurrence, true, record)));
            }
            warn!(
                occurrence_id,
                owner = %occurrence.user_id,
                user_id = %self.user_id,
                "Unauthorized occurrence set, skipping"
            );
        }
        self.exhausted = true;
        Ok(None)
    }

    fn current_position(&self) -> u64 {
        self.reader.position()
    }

    async fn resume_from(&mut self, offset: u64) -> SourceResult<()> {
        self.reader.skip_to(offset)?;
        self.exhausted = false;
        Ok(())
    }

    fn close(&mut self) {
        self.reader.close();
        self.exhausted = true;
    }

    fn input_id(&self) -> &str {
        &self.input_id
    }

    fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::constants::JobStatus;
    use crate::models::{BatchPayload, NewOccurrence, NewTaxon};
    use chrono::Utc;

    async fn seed(catalog: &InMemoryCatalog, owner: &str, name: &str) -> i64 {
        let taxon = catalog
            .find_or_insert_taxon(NewTaxon::user_supplied(owner, name, 40))
            .await
            .unwrap();
        catalog
            .insert_occurrence_for_owner(NewOccurrence {
                display_name: name.to_string(),
                user_id: owner.to_string(),
                taxon_id: taxon.taxon_id,
                squid: taxon.squid,
                record_count: 40,
                status: JobStatus::Complete,
                status_mod_time: Utc::now(),
            })
            .occurrence_id
    }

    #[tokio::test]
    async fn test_ownership_decides_batch_kind() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let owned = seed(&catalog, "kubi", "Puma concolor").await;
        let public = seed(&catalog, PUBLIC_USER, "Lynx rufus").await;
        let foreign = seed(&catalog, "someone", "Ursus arctos").await;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(
            &mut file,
            format!("{owned}\nnot-an-id\n{foreign}\n999\n{public}\n").as_bytes(),
        )
        .unwrap();

        let mut source = ExistingIdsSource::open(file.path(), "kubi", catalog.clone()).unwrap();

        let first = source.pull_next().await.unwrap().unwrap();
        assert!(matches!(first.payload, BatchPayload::CatalogOwned { .. }));
        assert_eq!(first.record_count, 40);
        assert_eq!(source.current_position(), 1);

        let second = source.pull_next().await.unwrap().unwrap();
        assert!(second.is_copy_on_read());
        assert_eq!(second.first_record, 5);
        assert_eq!(source.current_position(), 5);

        assert!(source.pull_next().await.unwrap().is_none());
    }
}
