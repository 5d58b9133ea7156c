//! Raw document sources.

use crate::error::SourceError;
use crate::value::Value;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::PathBuf;
use tracing::debug;

/// One stored raw document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub id: String,
    pub inserted_at: DateTime<Utc>,
    pub document: Value,
}

/// Selects documents inserted strictly after a cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReadFilter {
    pub after: Option<DateTime<Utc>>,
}

impl ReadFilter {
    pub fn all() -> Self {
        ReadFilter { after: None }
    }

    pub fn after(cursor: DateTime<Utc>) -> Self {
        ReadFilter {
            after: Some(cursor),
        }
    }

    /// The cursor is an exclusive lower bound.
    pub fn admits(&self, inserted_at: &DateTime<Utc>) -> bool {
        match &self.after {
            Some(cursor) => inserted_at > cursor,
            None => true,
        }
    }
}

/// Read access to stored raw documents
pub trait DocumentSource: Send + Sync {
    fn read(&self, filter: &ReadFilter) -> Result<Vec<SourceDocument>, SourceError>;
}

/// Documents held in memory, returned in insertion order
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    documents: Vec<SourceDocument>,
}

impl MemorySource {
    pub fn new(documents: Vec<SourceDocument>) -> Self {
        MemorySource { documents }
    }

    pub fn push(&mut self, document: SourceDocument) {
        self.documents.push(document);
    }
}

impl DocumentSource for MemorySource {
    fn read(&self, filter: &ReadFilter) -> Result<Vec<SourceDocument>, SourceError> {
        Ok(self
            .documents
            .iter()
            .filter(|d| filter.admits(&d.inserted_at))
            .cloned()
            .collect())
    }
}

/// Newline-delimited `{"id", "inserted_at", "document"}` records
#[derive(Debug, Clone)]
pub struct NdjsonSource {
    path: PathBuf,
}

impl NdjsonSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        NdjsonSource { path: path.into() }
    }
}

impl DocumentSource for NdjsonSource {
    fn read(&self, filter: &ReadFilter) -> Result<Vec<SourceDocument>, SourceError> {
        let reader = BufReader::new(File::open(&self.path)?);
        let mut documents = Vec::new();
        let mut skipped = 0usize;

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            // simd-json parses in place
            let mut bytes = line.into_bytes();
            let record: SourceDocument =
                simd_json::serde::from_slice(&mut bytes).map_err(|e| SourceError::Malformed {
                    line: idx + 1,
                    message: e.to_string(),
                })?;

            if filter.admits(&record.inserted_at) {
                documents.push(record);
            } else {
                skipped += 1;
            }
        }

        debug!(
            path = %self.path.display(),
            selected = documents.len(),
            skipped,
            "read documents"
        );
        Ok(documents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use std::io::Write;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, hour, 0, 0).unwrap()
    }

    fn doc(id: &str, hour: u32) -> SourceDocument {
        SourceDocument {
            id: id.to_string(),
            inserted_at: at(hour),
            document: Value::from(json!({"id": id})),
        }
    }

    #[test]
    fn test_filter_is_exclusive() {
        let filter = ReadFilter::after(at(10));
        assert!(!filter.admits(&at(9)));
        assert!(!filter.admits(&at(10)));
        assert!(filter.admits(&at(11)));
        assert!(ReadFilter::all().admits(&at(0)));
    }

    #[test]
    fn test_memory_source() {
        let source = MemorySource::new(vec![doc("a", 9), doc("b", 10), doc("c", 11)]);
        let ids: Vec<String> = source
            .read(&ReadFilter::after(at(9)))
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
    }

    #[test]
    fn test_ndjson_source() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"id": "a", "inserted_at": "2024-03-01T09:00:00Z", "document": {{"x": [1, 2]}}}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        writeln!(
            file,
            r#"{{"id": "b", "inserted_at": "2024-03-01T11:00:00Z", "document": {{"x": null}}}}"#
        )
        .unwrap();

        let source = NdjsonSource::new(file.path());
        let all = source.read(&ReadFilter::all()).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].document, Value::from(json!({"x": [1, 2]})));

        let later = source.read(&ReadFilter::after(at(10))).unwrap();
        assert_eq!(later.len(), 1);
        assert_eq!(later[0].id, "b");
    }

    #[test]
    fn test_ndjson_source_reports_bad_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"id": "a", "inserted_at": "2024-03-01T09:00:00Z", "document": {{}}}}"#
        )
        .unwrap();
        writeln!(file, r#"{{"id": "b", "document": {{}}}}"#).unwrap();

        let err = NdjsonSource::new(file.path())
            .read(&ReadFilter::all())
            .unwrap_err();
        assert!(matches!(err, SourceError::Malformed { line: 2, .. }), "got {err:?}");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = NdjsonSource::new("/nonexistent/docs.ndjson")
            .read(&ReadFilter::all())
            .unwrap_err();
        assert!(matches!(err, SourceError::Io(_)));
    }
}
