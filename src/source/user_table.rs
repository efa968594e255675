//! One delimited table, grouped by contiguous runs of a key column.

use super::line_reader::LineReader;
use super::{check_record, OccurrenceSource, SourceResult};
use crate::config::{ColumnNames, ConfigurationError};
use crate::models::{ColumnRoles, OccurrenceBatch, TaxonKey};
use async_trait::async_trait;
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug)]
pub struct UserTableSource {
    reader: LineReader,
    columns: ColumnRoles,
    group_by: usize,
    group_key_is_source_key: bool,
    input_id: String,
    exhausted: bool,
}

impl UserTableSource {
    /// Open the table and resolve column roles against its header
    pub fn open(
        path: &Path,
        delimiter: u8,
        names: &ColumnNames,
        group_key_is_source_key: bool,
    ) -> SourceResult<Self> {
        let reader = LineReader::open(path, delimiter, true)?;
        let header = reader.header().ok_or_else(|| {
            ConfigurationError::invalid_input(path.display().to_string(), "missing header line")
        })?;
        let columns = ColumnRoles::from_header(
            header,
            Some(names.group_by.as_str()),
            &names.latitude,
            &names.longitude,
            names.unique_id.as_deref(),
            names.taxon_name.as_deref(),
        )
        .map_err(|reason| ConfigurationError::invalid_input(path.display().to_string(), reason))?;
        let group_by = columns.group_by.unwrap_or_default();

        debug!(
            path = %path.display(),
            width = columns.width(),
            group_by = names.group_by.as_str(),
            "Opened user occurrence table"
        );

        Ok(Self {
            reader,
            columns,
            group_by,
            group_key_is_source_key,
            input_id: path.display().to_string(),
            exhausted: false,
        })
    }

    pub fn columns(&self) -> &ColumnRoles {
        &self.columns
    }

    /// Next well-formed record with its 1-indexed record number
    fn next_record(&mut self) -> SourceResult<Option<(u64, Vec<String>)>> {
        while let Some(fields) = self.reader.next_record()? {
            match check_record(&self.columns, &fields) {
                Ok(()) => return Ok(Some((self.reader.position(), fields))),
                Err(reason) => self.warn_malformed(&reason),
            }
        }
        Ok(None)
    }

    fn warn_malformed(&self, reason: &str) {
        warn!(
            path = %self.reader.path().display(),
            record = self.reader.position(),
            reason,
            "Skipping malformed occurrence record"
        );
    }

    fn taxon_key(&self, group_key: &str, first_row: &[String]) -> TaxonKey {
        if self.group_key_is_source_key {
            return TaxonKey::SourceKey(group_key.to_string());
        }
        let scientific_name = self
            .columns
            .taxon_name
            .and_then(|idx| first_row.get(idx))
            .filter(|name| !name.is_empty())
            .cloned()
            .unwrap_or_else(|| group_key.to_string());
        TaxonKey::Name {
            scientific_name,
            source_key: None,
        }
    }
}

#[async_trait]
impl OccurrenceSource for UserTableSource {
    async fn pull_next(&mut self) -> SourceResult<Option<OccurrenceBatch>> {
        let Some((first_record, first_row)) = self.next_record()? else {
            self.exhausted = true;
            return Ok(None);
        };
        let group_key = first_row[self.group_by].clone();
        let taxon_key = self.taxon_key(&group_key, &first_row);
        let mut rows = vec![first_row];

        while let Some(fields) = self.reader.next_record()? {
            match check_record(&self.columns, &fields) {
                Ok(()) if fields[self.group_by] == group_key => rows.push(fields),
                Ok(()) => {
                    self.reader.push_back(fields);
                    break;
                }
                Err(reason) => self.warn_malformed(&reason),
            }
        }

        Ok(Some(OccurrenceBatch::from_rows(
            group_key,
            rows,
            Some(self.columns.clone()),
            taxon_key,
            first_record,
        )))
    }

    fn current_position(&self) -> u64 {
        self.reader.position()
    }

    async fn resume_from(&mut self, offset: u64) -> SourceResult<()> {
        let reached = self.reader.skip_to(offset)?;
        if reached < offset {
            warn!(
                path = %self.input_id,
                requested = offset,
                reached,
                "Resume position is past the end of the table"
            );
        }
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
    use crate::source::SourceError;
    use std::io::Write;

    fn names() -> ColumnNames {
        ColumnNames {
            group_by: "taxon".into(),
            latitude: "lat".into(),
            longitude: "lon".into(),
            unique_id: Some("id".into()),
            taxon_name: None,
        }
    }

    fn table(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_contiguous_groups_and_positions() {
        let file = table(
            "id,taxon,lat,lon\n\
             1,Puma concolor,10.0,-80.0\n\
             2,Puma concolor,11.0,-81.0\n\
             3,Lynx rufus,40.0,-100.0\n\
             4,Puma concolor,12.0,-82.0\n",
        );
        let mut source = UserTableSource::open(file.path(), b',', &names(), false).unwrap();

        let first = source.pull_next().await.unwrap().unwrap();
        assert_eq!(first.group_key, "Puma concolor");
        assert_eq!(first.record_count, 2);
        assert_eq!(first.first_record, 1);
        assert_eq!(source.current_position(), 2);

        let second = source.pull_next().await.unwrap().unwrap();
        assert_eq!(second.group_key, "Lynx rufus");
        assert_eq!(second.first_record, 3);
        assert_eq!(source.current_position(), 3);

        let third = source.pull_next().await.unwrap().unwrap();
        assert_eq!(third.group_key, "Puma concolor");
        assert_eq!(third.record_count, 1);

        assert!(source.pull_next().await.unwrap().is_none());
        assert!(source.is_exhausted());
        assert_eq!(source.current_position(), 4);
    }

    #[tokio::test]
    async fn test_malformed_records_advance_position() {
        let file = table(
            "id,taxon,lat,lon\n\
             1,Puma concolor,10.0,-80.0\n\
             2,Puma concolor,abc,-80.0\n\
             3,Puma concolor,0,0\n\
             4,,1.0,1.0\n\
             5,Puma concolor,1.0\n\
             6,Puma concolor,12.0,-82.0\n",
        );
        let mut source = UserTableSource::open(file.path(), b',', &names(), false).unwrap();
        let batch = source.pull_next().await.unwrap().unwrap();
        assert_eq!(batch.record_count, 2);
        assert_eq!(source.current_position(), 6);
    }

    #[tokio::test]
    async fn test_resume_skips_consumed_records() {
        let file = table(
            "id,taxon,lat,lon\n\
             1,A,1.0,1.0\n\
             2,A,1.0,1.0\n\
             3,B,2.0,2.0\n",
        );
        let mut source = UserTableSource::open(file.path(), b',', &names(), true).unwrap();
        source.resume_from(2).await.unwrap();
        let batch = source.pull_next().await.unwrap().unwrap();
        assert_eq!(batch.group_key, "B");
        assert_eq!(batch.first_record, 3);
        assert_eq!(batch.taxon_key, TaxonKey::SourceKey("B".into()));
    }

    #[tokio::test]
    async fn test_quoted_fields_with_delimiters_are_kept() {
        let file = table(
            "id,taxon,lat,lon,remarks\n\
             1,Puma concolor,10.5,-80.0,plain\n\
             2,Puma concolor,11.5,-81.0,\"seen near river, north bank\"\n\
             3,\"Lynx rufus\",40.0,-100.0,\"fence, \"\"old\"\" gate\"\n",
        );
        let mut source = UserTableSource::open(file.path(), b',', &names(), false).unwrap();

        let puma = source.pull_next().await.unwrap().unwrap();
        assert_eq!(puma.record_count, 2);
        assert_eq!(puma.rows[1][4], "seen near river, north bank");

        let lynx = source.pull_next().await.unwrap().unwrap();
        assert_eq!(lynx.group_key, "Lynx rufus");
        assert_eq!(lynx.rows[0][4], "fence, \"old\" gate");
        assert_eq!(source.current_position(), 3);
    }

    #[test]
    fn test_missing_column_is_configuration_error() {
        let file = table("id,species,lat,lon\n");
        let err = UserTableSource::open(file.path(), b',', &names(), false).unwrap_err();
        assert!(matches!(err, SourceError::Configuration(_)));
    }
}
