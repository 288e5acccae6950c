//! Quarantine area for rejected records
//!
//! Rejected records of batch `N` land in `error_dir/batch_N.csv`: the original
//! columns followed by `reason`, `detail`, `source_file` and `line`. The file
//! is written to a dot-prefixed temporary and renamed into place, so readers
//! only ever see complete files. A retried batch rewrites its own file.

use esp_common::types::{RejectedRecord, SOURCE_COLUMNS};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::IngestError;

/// Columns appended after the source columns
pub const QUARANTINE_EXTRA_COLUMNS: [&str; 4] = ["reason", "detail", "source_file", "line"];

#[derive(Debug, Clone)]
pub struct QuarantineWriter {
    dir: PathBuf,
}

impl QuarantineWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn batch_path(&self, sequence: u64) -> PathBuf {
        self.dir.join(format!("batch_{}.csv", sequence))
    }

    /// Persist the rejects of batch `sequence`
    ///
    /// Returns the file written, or `None` when there was nothing to write
    /// (any file left by an earlier attempt of the same batch is removed).
    pub fn write_batch(
        &self,
        sequence: u64,
        rejected: &[RejectedRecord],
    ) -> Result<Option<PathBuf>, IngestError> {
        let path = self.batch_path(sequence);
        let failure = |source| IngestError::ErrorSinkWriteFailure {
            path: path.clone(),
            source,
        };

        if rejected.is_empty() {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed stale quarantine file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {},
                Err(e) => return Err(failure(e)),
            }
            return Ok(None);
        }

        std::fs::create_dir_all(&self.dir).map_err(failure)?;
        let tmp_path = self.dir.join(format!(".batch_{}.csv.tmp", sequence));

        let written = write_csv(&tmp_path, rejected).and_then(|_| std::fs::rename(&tmp_path, &path));
        if let Err(e) = written {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(failure(e));
        }

        info!(
            path = %path.display(),
            records = rejected.len(),
            "Rejected records quarantined"
        );
        Ok(Some(path))
    }
}

fn write_csv(path: &Path, rejected: &[RejectedRecord]) -> io::Result<()> {
    let file = File::create(path)?;
    let mut writer = csv::Writer::from_writer(file);

    writer.write_record(SOURCE_COLUMNS.iter().chain(QUARANTINE_EXTRA_COLUMNS.iter()))?;
    for record in rejected {
        let line = record.line.map(|l| l.to_string()).unwrap_or_default();
        writer.write_record(
            record
                .raw
                .to_row()
                .into_iter()
                .chain([
                    record.reason.as_str(),
                    record.detail.as_str(),
                    record.source_file.as_deref().unwrap_or_default(),
                    line.as_str(),
                ]),
        )?;
    }

    let mut file = writer
        .into_inner()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
    file.flush()?;
    file.sync_all()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use esp_common::types::{RawRecord, RejectReason};
    use tempfile::TempDir;

    fn rejected(id: &str, reason: RejectReason) -> RejectedRecord {
        RejectedRecord::new(
            RawRecord {
                event_id: Some(id.to_string()),
                price: Some("abc".to_string()),
                ..Default::default()
            },
            reason,
            "price 'abc'",
        )
        .at("events_3.csv", 7)
    }

    #[test]
    fn test_writes_header_and_rows() {
        let dir = TempDir::new().unwrap();
        let writer = QuarantineWriter::new(dir.path().join("error"));

        let path = writer
            .write_batch(4, &[rejected("e1", RejectReason::MalformedNumeric)])
            .unwrap()
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "batch_4.csv");

        let mut reader = csv::Reader::from_path(&path).unwrap();
        let headers = reader.headers().unwrap().clone();
        assert_eq!(headers.len(), 12);
        assert_eq!(&headers[0], "event_id");
        assert_eq!(&headers[8], "reason");

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(&rows[0][0], "e1");
        assert_eq!(&rows[0][5], "abc");
        assert_eq!(&rows[0][8], "MalformedNumeric");
        assert_eq!(&rows[0][10], "events_3.csv");
        assert_eq!(&rows[0][11], "7");
    }

    #[test]
    fn test_retry_rewrites_same_file() {
        let dir = TempDir::new().unwrap();
        let writer = QuarantineWriter::new(dir.path());
        let batch = vec![
            rejected("e1", RejectReason::MalformedNumeric),
            rejected("e2", RejectReason::DuplicateId),
        ];

        writer.write_batch(1, &batch).unwrap();
        writer.write_batch(1, &batch).unwrap();

        let rows = csv::Reader::from_path(writer.batch_path(1)).unwrap().records().count();
        assert_eq!(rows, 2);
        // no temporaries left behind
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["batch_1.csv".to_string()]);
    }

    #[test]
    fn test_empty_batch_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let writer = QuarantineWriter::new(dir.path());
        writer.write_batch(2, &[rejected("e1", RejectReason::MissingField)]).unwrap();

        assert!(writer.write_batch(2, &[]).unwrap().is_none());
        assert!(!writer.batch_path(2).exists());
    }

    #[test]
    fn test_unwritable_dir_is_error_sink_failure() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, "x").unwrap();
        let writer = QuarantineWriter::new(&blocker);

        let err = writer
            .write_batch(1, &[rejected("e1", RejectReason::MissingField)])
            .unwrap_err();
        assert!(matches!(err, IngestError::ErrorSinkWriteFailure { .. }));
    }
}
