use super::OccurrenceEntity;
use serde::{Deserialize, Serialize};

/// Which column of a raw record carries which role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnRoles {
    pub header: Vec<String>,
    /// Absent when every record of the input belongs to one taxon
    pub group_by: Option<usize>,
    pub latitude: usize,
    pub longitude: usize,
    pub unique_id: Option<usize>,
    pub taxon_name: Option<usize>,
}

impl ColumnRoles {
    /// Resolve role names against a header
    pub fn from_header(
        header: &[String],
        group_by: Option<&str>,
        latitude: &str,
        longitude: &str,
        unique_id: Option<&str>,
        taxon_name: Option<&str>,
    ) -> Result<Self, String> {
        let find = |name: &str| {
            header
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| format!("column '{name}' not found in header {header:?}"))
        };
        Ok(Self {
            group_by: group_by.map(find).transpose()?,
            latitude: find(latitude)?,
            longitude: find(longitude)?,
            unique_id: unique_id.map(find).transpose()?,
            taxon_name: taxon_name.map(find).transpose()?,
            header: header.to_vec(),
        })
    }

    /// Number of fields every record must carry
    pub fn width(&self) -> usize {
        self.header.len()
    }
}

/// How the taxon for a batch must be resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaxonKey {
    /// Identifier in the configured taxonomy authority
    SourceKey(String),
    /// Name asserted by the input, optionally with an authority key already known
    Name {
        scientific_name: String,
        source_key: Option<String>,
    },
    /// Squid of an already catalogued taxon
    Squid(String),
}

/// Where the batch's records come from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchPayload {
    /// Records are carried inline in `rows`
    Rows,
    /// An occurrence set the walking user already owns
    CatalogOwned { occurrence: OccurrenceEntity },
    /// A public occurrence set to be copied into the walking user's space
    CatalogCopy { source: OccurrenceEntity },
}

/// OccurrenceBatch is an ordered run of raw records sharing one grouping key.
///
/// Produced by a data source per pull and consumed immediately; never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccurrenceBatch {
    pub group_key: String,
    pub record_count: usize,
    pub rows: Vec<Vec<String>>,
    pub columns: Option<ColumnRoles>,
    pub taxon_key: TaxonKey,
    pub payload: BatchPayload,
    /// 1-indexed position of the first record of this batch in its input
    pub first_record: u64,
}

impl OccurrenceBatch {
    /// A batch of inline records
    pub fn from_rows(
        group_key: String,
        rows: Vec<Vec<String>>,
        columns: Option<ColumnRoles>,
        taxon_key: TaxonKey,
        first_record: u64,
    ) -> Self {
        Self {
            group_key,
            record_count: rows.len(),
            rows,
            columns,
            taxon_key,
            payload: BatchPayload::Rows,
            first_record,
        }
    }

    /// A batch standing for an existing catalog entry
    pub fn from_catalog(occurrence: OccurrenceEntity, copy: bool, first_record: u64) -> Self {
        let taxon_key = TaxonKey::Squid(occurrence.squid.clone());
        let record_count = usize::try_from(occurrence.record_count).unwrap_or(0);
        let group_key = occurrence.display_name.clone();
        let payload = if copy {
            BatchPayload::CatalogCopy { source: occurrence }
        } else {
            BatchPayload::CatalogOwned { occurrence }
        };
        Self {
            group_key,
            record_count,
            rows: Vec::new(),
            columns: None,
            taxon_key,
            payload,
            first_record,
        }
    }

    pub fn is_copy_on_read(&self) -> bool {
        matches!(self.payload, BatchPayload::CatalogCopy { .. })
    }
}
