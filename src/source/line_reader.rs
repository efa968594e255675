//! Delimited record reader shared by the file-backed sources.

use super::{SourceError, SourceResult};
use csv::{Reader, ReaderBuilder, StringRecord, Trim};
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Counts consumed data records and supports a single record of push-back.
///
/// Quoted fields may contain the delimiter or line breaks; blank lines are not
/// records and never count toward the position.
#[derive(Debug)]
pub(crate) struct LineReader {
    path: PathBuf,
    delimiter: u8,
    has_header: bool,
    header: Option<Vec<String>>,
    records: Option<Reader<File>>,
    consumed: u64,
    pushed_back: Option<Vec<String>>,
}

fn fields(record: &StringRecord) -> Vec<String> {
    record.iter().map(str::to_string).collect()
}

impl LineReader {
    pub(crate) fn open(path: &Path, delimiter: u8, has_header: bool) -> SourceResult<Self> {
        let mut reader = Self {
            path: path.to_path_buf(),
            delimiter,
            has_header,
            header: None,
            records: None,
            consumed: 0,
            pushed_back: None,
        };
        reader.reopen()?;
        Ok(reader)
    }

    fn reopen(&mut self) -> SourceResult<()> {
        let file = File::open(&self.path).map_err(|e| SourceError::io(&self.path, e))?;
        let mut records = ReaderBuilder::new()
            .delimiter(self.delimiter)
            .has_headers(self.has_header)
            .flexible(true)
            .trim(Trim::All)
            .from_reader(file);

        self.header = None;
        if self.has_header {
            let header = records
                .headers()
                .map_err(|e| SourceError::csv(&self.path, e))?;
            if !header.is_empty() {
                self.header = Some(fields(header));
            }
        }
        self.records = Some(records);
        self.consumed = 0;
        self.pushed_back = None;
        Ok(())
    }

    pub(crate) fn header(&self) -> Option<&[String]> {
        self.header.as_deref()
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Next data record; undecodable records come back empty so callers treat them as malformed
    pub(crate) fn next_record(&mut self) -> SourceResult<Option<Vec<String>>> {
        if let Some(record) = self.pushed_back.take() {
            self.consumed += 1;
            return Ok(Some(record));
        }
        let Some(records) = self.records.as_mut() else {
            return Ok(None);
        };
        let mut record = StringRecord::new();
        match records.read_record(&mut record) {
            Ok(true) => {
                self.consumed += 1;
                Ok(Some(fields(&record)))
            }
            Ok(false) => Ok(None),
            Err(e) if matches!(e.kind(), csv::ErrorKind::Utf8 { .. }) => {
                self.consumed += 1;
                warn!(
                    path = %self.path.display(),
                    record = self.consumed,
                    "Skipping record that is not valid UTF-8"
                );
                Ok(Some(Vec::new()))
            }
            Err(e) => Err(SourceError::csv(&self.path, e)),
        }
    }

    /// Return the last record read; it no longer counts as consumed
    pub(crate) fn push_back(&mut self, record: Vec<String>) {
        self.consumed = self.consumed.saturating_sub(1);
        self.pushed_back = Some(record);
    }

    /// Restart from the top and skip `offset` data records; returns the records actually skipped
    pub(crate) fn skip_to(&mut self, offset: u64) -> SourceResult<u64> {
        self.reopen()?;
        while self.consumed < offset {
            if self.next_record()?.is_none() {
                break;
            }
        }
        Ok(self.consumed)
    }

    pub(crate) fn position(&self) -> u64 {
        self.consumed
    }

    pub(crate) fn close(&mut self) {
        self.records = None;
        self.pushed_back = None;
    }
}
