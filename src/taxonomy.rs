//! # Taxonomy Resolution
//!
//! Seam to the external name-resolution service (GBIF backbone, ITIS, ...).
//! The walker only depends on [`TaxonomyResolver`]; HTTP clients live outside
//! this crate. [`StaticTaxonomyResolver`] serves pre-resolved dumps and tests.

use async_trait::async_trait;
use csv::{ReaderBuilder, Trim};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Taxonomic status reported by the authority
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaxonomicStatus {
    Accepted,
    Synonym,
    /// Doubtful, heterotypic, misapplied, ...; treated as no match
    Other(String),
}

impl TaxonomicStatus {
    /// Only accepted names and synonyms are catalogued
    pub fn is_catalogable(&self) -> bool {
        matches!(self, Self::Accepted | Self::Synonym)
    }
}

impl fmt::Display for TaxonomicStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Accepted => write!(f, "accepted"),
            Self::Synonym => write!(f, "synonym"),
            Self::Other(status) => write!(f, "{}", status.to_lowercase()),
        }
    }
}

impl std::str::FromStr for TaxonomicStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "accepted" => Ok(Self::Accepted),
            "synonym" => Ok(Self::Synonym),
            "" => Err("Empty taxonomic status".to_string()),
            other => Ok(Self::Other(other.to_string())),
        }
    }
}

/// One record returned by the authority
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyRecord {
    pub status: TaxonomicStatus,
    pub scientific_name: String,
    pub canonical_name: Option<String>,
    /// Key the record is catalogued under
    pub source_key: String,
    pub rank: Option<String>,
    pub kingdom: Option<String>,
    pub phylum: Option<String>,
    pub taxon_class: Option<String>,
    pub taxon_order: Option<String>,
    pub family: Option<String>,
    pub genus: Option<String>,
}

#[derive(Debug, Error)]
pub enum TaxonomyError {
    #[error("Taxonomy service unavailable: {0}")]
    Unavailable(String),
    #[error("Malformed taxonomy response for {key}: {reason}")]
    MalformedResponse { key: String, reason: String },
}

/// External taxonomy-name resolution service
#[async_trait]
pub trait TaxonomyResolver: Send + Sync {
    /// Resolve a source-specific key (or name) to an authority record.
    ///
    /// `Ok(None)` means the authority does not know the key.
    async fn resolve(
        &self,
        key: &str,
        kingdom: Option<&str>,
    ) -> Result<Option<TaxonomyRecord>, TaxonomyError>;

    /// Name of the authority, as registered in the catalog's taxonomy sources
    fn source_name(&self) -> &str;
}

/// Resolver backed by an in-memory table of records
#[derive(Debug, Clone)]
pub struct StaticTaxonomyResolver {
    source_name: String,
    records: HashMap<String, TaxonomyRecord>,
}

impl StaticTaxonomyResolver {
    pub fn new<S: Into<String>>(source_name: S) -> Self {
        Self {
            source_name: source_name.into(),
            records: HashMap::new(),
        }
    }

    /// Register a record under the key callers will look it up by
    pub fn with_record<S: Into<String>>(mut self, lookup_key: S, record: TaxonomyRecord) -> Self {
        self.records.insert(lookup_key.into(), record);
        self
    }

    /// Parse a tab-delimited dump: `key, status, scientific name, canonical name,
    /// rank, kingdom, phylum, class, order, family, genus`.
    ///
    /// Lines with fewer than four fields, and a `key` header line, are ignored.
    pub fn from_tsv<S: Into<String>>(source_name: S, contents: &str) -> Self {
        let mut resolver = Self::new(source_name);
        let mut records = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .quoting(false)
            .trim(Trim::All)
            .from_reader(contents.as_bytes());
        for row in records.records() {
            let Ok(row) = row else {
                continue;
            };
            if row.len() < 4 || &row[0] == "key" {
                continue;
            }
            let Ok(status) = row[1].parse::<TaxonomicStatus>() else {
                continue;
            };
            let field = |idx: usize| {
                row.get(idx)
                    .filter(|v| !v.is_empty())
                    .map(str::to_string)
            };
            let record = TaxonomyRecord {
                status,
                scientific_name: row[2].to_string(),
                canonical_name: field(3),
                source_key: row[0].to_string(),
                rank: field(4),
                kingdom: field(5),
                phylum: field(6),
                taxon_class: field(7),
                taxon_order: field(8),
                family: field(9),
                genus: field(10),
            };
            resolver.records.insert(row[0].to_string(), record);
        }
        resolver
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl TaxonomyResolver for StaticTaxonomyResolver {
    async fn resolve(
        &self,
        key: &str,
        _kingdom: Option<&str>,
    ) -> Result<Option<TaxonomyRecord>, TaxonomyError> {
        Ok(self.records.get(key).cloned())
    }

    fn source_name(&self) -> &str {
        &self.source_name
    }
}
