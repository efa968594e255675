//! One delimited file per taxon, enumerated through a cached manifest.

use super::line_reader::LineReader;
use super::{check_record, OccurrenceSource, SourceError, SourceResult};
use crate::config::CoordinateColumns;
use crate::constants::CSV_EXT;
use crate::models::{ColumnRoles, OccurrenceBatch, TaxonKey};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Taxon named by a `Genus_species[_sourcekey].csv` file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonFileName {
    pub binomial: String,
    pub source_key: Option<String>,
}

impl TaxonFileName {
    pub fn parse(path: &Path) -> Option<Self> {
        let stem = path.file_stem()?.to_str()?;
        let mut parts = stem.split('_');
        let genus = parts.next().filter(|p| !p.is_empty())?;
        let species = parts.next().filter(|p| !p.is_empty())?;
        let source_key = parts.next().filter(|p| !p.is_empty()).map(str::to_string);
        if parts.next().is_some() {
            return None;
        }
        Some(Self {
            binomial: format!("{genus} {species}"),
            source_key,
        })
    }
}

/// Manifest records are single paths; quoting keeps odd paths intact
const MANIFEST_DELIMITER: u8 = b',';

/// What reading one listed taxon file produced
enum TaxonFile {
    Rows {
        columns: ColumnRoles,
        rows: Vec<Vec<String>>,
    },
    Skipped(String),
}

#[derive(Debug)]
pub struct TaxonFileSetSource {
    manifest: LineReader,
    delimiter: u8,
    has_header: bool,
    columns: CoordinateColumns,
    input_id: String,
    exhausted: bool,
}

impl TaxonFileSetSource {
    pub fn open(
        directory: &Path,
        manifest_path: &Path,
        delimiter: u8,
        has_header: bool,
        columns: &CoordinateColumns,
        expiration: DateTime<Utc>,
    ) -> SourceResult<Self> {
        if Self::manifest_is_stale(manifest_path, expiration)? {
            Self::rebuild_manifest(directory, manifest_path)?;
        } else {
            debug!(manifest = %manifest_path.display(), "Reusing cached taxon file manifest");
        }

        Ok(Self {
            manifest: LineReader::open(manifest_path, MANIFEST_DELIMITER, false)?,
            delimiter,
            has_header,
            columns: columns.clone(),
            input_id: directory.display().to_string(),
            exhausted: false,
        })
    }

    fn manifest_is_stale(manifest_path: &Path, expiration: DateTime<Utc>) -> SourceResult<bool> {
        match fs::metadata(manifest_path) {
            Ok(metadata) => {
                let modified = metadata
                    .modified()
                    .map_err(|e| SourceError::io(manifest_path, e))?;
                Ok(DateTime::<Utc>::from(modified) < expiration)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(true),
            Err(e) => Err(SourceError::io(manifest_path, e)),
        }
    }

    /// List every `.csv` under `directory`, sorted, one path per record
    fn rebuild_manifest(directory: &Path, manifest_path: &Path) -> SourceResult<()> {
        let mut files = Vec::new();
        for entry in WalkDir::new(directory).follow_links(true) {
            let entry = entry.map_err(|e| {
                let io = e
                    .into_io_error()
                    .unwrap_or_else(|| std::io::Error::other("directory loop"));
                SourceError::io(directory, io)
            })?;
            let is_csv = entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| format!(".{}", ext.to_ascii_lowercase()) == CSV_EXT);
            if entry.file_type().is_file() && is_csv {
                files.push(entry.into_path());
            }
        }
        files.sort();

        if let Some(parent) = manifest_path.parent() {
            fs::create_dir_all(parent).map_err(|e| SourceError::io(parent, e))?;
        }
        let tmp = manifest_path.with_extension("tmp");
        let mut out = WriterBuilder::new()
            .delimiter(MANIFEST_DELIMITER)
            .has_headers(false)
            .from_path(&tmp)
            .map_err(|e| SourceError::csv(&tmp, e))?;
        for file in &files {
            out.write_record([file.to_string_lossy().as_bytes()])
                .map_err(|e| SourceError::csv(&tmp, e))?;
        }
        let out = out
            .into_inner()
            .map_err(|e| SourceError::io(&tmp, e.into_error()))?;
        out.sync_all().map_err(|e| SourceError::io(&tmp, e))?;
        fs::rename(&tmp, manifest_path).map_err(|e| SourceError::io(manifest_path, e))?;

        info!(
            directory = %directory.display(),
            manifest = %manifest_path.display(),
            files = files.len(),
            "Rebuilt taxon file manifest"
        );
        Ok(())
    }

    /// Well-formed records of one taxon file with the roles of its columns
    fn read_taxon_file(&self, path: &Path) -> SourceResult<TaxonFile> {
        let mut reader = match LineReader::open(path, self.delimiter, self.has_header) {
            Ok(reader) => reader,
            Err(SourceError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
                return Ok(TaxonFile::Skipped("listed in manifest but missing".to_string()))
            }
            Err(e) => return Err(e),
        };
        let Some(header) = reader
            .header()
            .map(<[String]>::to_vec)
            .or_else(|| self.columns.header.clone())
        else {
            return Ok(TaxonFile::Skipped("missing header line".to_string()));
        };
        let columns = match ColumnRoles::from_header(
            &header,
            None,
            &self.columns.latitude,
            &self.columns.longitude,
            self.columns.unique_id.as_deref(),
            None,
        ) {
            Ok(columns) => columns,
            Err(reason) => return Ok(TaxonFile::Skipped(reason)),
        };

        let mut rows = Vec::new();
        while let Some(fields) = reader.next_record()? {
            match check_record(&columns, &fields) {
                Ok(()) => rows.push(fields),
                Err(reason) => warn!(
                    path = %path.display(),
                    record = reader.position(),
                    %reason,
                    "Skipping malformed occurrence record"
                ),
            }
        }
        if rows.is_empty() {
            return Ok(TaxonFile::Skipped("no well-formed occurrence records".to_string()));
        }
        Ok(TaxonFile::Rows { columns, rows })
    }
}

#[async_trait]
impl OccurrenceSource for TaxonFileSetSource {
    async fn pull_next(&mut self) -> SourceResult<Option<OccurrenceBatch>> {
        while let Some(entry) = self.manifest.next_record()? {
            let record = self.manifest.position();
            let Some(path) = entry.first().filter(|p| !p.is_empty()).map(PathBuf::from) else {
                continue;
            };
            let Some(name) = TaxonFileName::parse(&path) else {
                warn!(path = %path.display(), record, "Skipping file with unparseable taxon name");
                continue;
            };
            let (columns, rows) = match self.read_taxon_file(&path)? {
                TaxonFile::Rows { columns, rows } => (columns, rows),
                TaxonFile::Skipped(reason) => {
                    warn!(path = %path.display(), record, %reason, "Skipping taxon file");
                    continue;
                }
            };

            let group_key = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| name.binomial.clone());
            let taxon_key = TaxonKey::Name {
                scientific_name: name.binomial,
                source_key: name.source_key,
            };
            return Ok(Some(OccurrenceBatch::from_rows(
                group_key,
                rows,
                Some(columns),
                taxon_key,
                record,
            )));
        }
        self.exhausted = true;
        Ok(None)
    }

    fn current_position(&self) -> u64 {
        self.manifest.position()
    }

    async fn resume_from(&mut self, offset: u64) -> SourceResult<()> {
        self.manifest.skip_to(offset)?;
        self.exhausted = false;
        Ok(())
    }

    fn close(&mut self) {
        self.manifest.close();
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
    use chrono::Duration;

    #[test]
    fn test_file_name_parsing() {
        assert_eq!(
            TaxonFileName::parse(Path::new("/d/Puma_concolor_2435099.csv")),
            Some(TaxonFileName {
                binomial: "Puma concolor".into(),
                source_key: Some("2435099".into()),
            })
        );
        assert_eq!(
            TaxonFileName::parse(Path::new("Lynx_rufus.csv")).unwrap().source_key,
            None
        );
        assert!(TaxonFileName::parse(Path::new("Puma.csv")).is_none());
        assert!(TaxonFileName::parse(Path::new("a_b_c_d.csv")).is_none());
    }

    #[tokio::test]
    async fn test_walks_manifest_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("taxa");
        fs::create_dir_all(&data).unwrap();
        fs::write(
            data.join("Puma_concolor_2435099.csv"),
            "longitude,latitude\n-80,10\n-81,11\n",
        )
        .unwrap();
        fs::write(data.join("Lynx_rufus.csv"), "longitude,latitude\n-100,40\n").unwrap();
        fs::write(data.join("bad.csv"), "longitude,latitude\n1,1\n").unwrap();
        fs::write(data.join("notes.txt"), "ignored").unwrap();
        let manifest = dir.path().join("manifest.txt");

        let expiration = Utc::now() - Duration::days(1);
        let mut source =
            TaxonFileSetSource::open(&data, &manifest, b',', true, &Default::default(), expiration)
                .unwrap();
        assert_eq!(fs::read_to_string(&manifest).unwrap().lines().count(), 3);

        let lynx = source.pull_next().await.unwrap().unwrap();
        assert_eq!(lynx.group_key, "Lynx_rufus");
        assert_eq!(lynx.record_count, 1);
        assert_eq!(source.current_position(), 1);

        let puma = source.pull_next().await.unwrap().unwrap();
        assert_eq!(
            puma.taxon_key,
            TaxonKey::Name {
                scientific_name: "Puma concolor".into(),
                source_key: Some("2435099".into()),
            }
        );
        assert_eq!(puma.record_count, 2);
        let columns = puma.columns.unwrap();
        assert_eq!(columns.header, ["longitude", "latitude"]);
        assert_eq!((columns.latitude, columns.longitude), (1, 0));
        assert_eq!(source.current_position(), 2);

        assert!(source.pull_next().await.unwrap().is_none());
        assert!(source.is_exhausted());
    }

    #[tokio::test]
    async fn test_fresh_manifest_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = dir.path().join("manifest.txt");
        fs::write(&manifest, "/nowhere/Puma_concolor.csv\n").unwrap();

        let expiration = Utc::now() - Duration::days(1);
        let mut source =
            TaxonFileSetSource::open(dir.path(), &manifest, b',', true, &Default::default(), expiration)
                .unwrap();
        assert!(source.pull_next().await.unwrap().is_none());
        assert_eq!(source.current_position(), 1);
        assert_eq!(fs::read_to_string(&manifest).unwrap(), "/nowhere/Puma_concolor.csv\n");
    }

    #[tokio::test]
    async fn test_malformed_rows_are_not_counted() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("taxa");
        fs::create_dir_all(&data).unwrap();
        fs::write(
            data.join("Puma_concolor.csv"),
            "latitude,longitude,remarks\n\
             10.5,-80.0,\"near river, north bank\"\n\
             0,0,null island\n\
             north,-81.0,typo\n\
             11.5\n\
             12.5,-82.0,\n",
        )
        .unwrap();
        fs::write(data.join("Lynx_rufus.csv"), "lat,lon\n40,-100\n").unwrap();
        let manifest = dir.path().join("manifest.txt");

        let expiration = Utc::now() - Duration::days(1);
        let mut source =
            TaxonFileSetSource::open(&data, &manifest, b',', true, &Default::default(), expiration)
                .unwrap();

        let puma = source.pull_next().await.unwrap().unwrap();
        assert_eq!(puma.group_key, "Puma_concolor");
        assert_eq!(puma.record_count, 2);
        assert_eq!(puma.rows[0][2], "near river, north bank");
        assert_eq!(source.current_position(), 2);
        assert!(source.pull_next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_headerless_files_use_the_assumed_header() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("taxa");
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("Lynx_rufus.csv"), "-100\t40\n-101\t41\n").unwrap();
        let columns = CoordinateColumns {
            header: Some(vec!["longitude".into(), "latitude".into()]),
            ..Default::default()
        };

        let expiration = Utc::now() - Duration::days(1);
        let mut source = TaxonFileSetSource::open(
            &data,
            &dir.path().join("manifest.txt"),
            b'\t',
            false,
            &columns,
            expiration,
        )
        .unwrap();
        let lynx = source.pull_next().await.unwrap().unwrap();
        assert_eq!(lynx.record_count, 2);
        assert_eq!(lynx.rows[1], ["-101", "41"]);
    }
}
