//! Append-only quarantine sink for rejected raw records (spec §2 component
//! 2, §6.4). Generalizes the teacher's in-memory `signals/storage.rs`
//! `VecDeque` sink into a durable, date-rotated, file-backed one: a
//! quarantined row must survive process restart.

use crate::models::FlatRecord;
use crate::validation::Diagnostic;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// One rejected record, written as a single JSON line (spec §6.4 shape).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineEntry {
    pub job_id: String,
    pub chunk_id: String,
    pub schema: String,
    pub reason: String,
    pub errors: Vec<Diagnostic>,
    pub raw_record: FlatRecord,
}

/// Writes quarantine entries under `dlq/validation_failures/`, one
/// date-rotated JSONL file per UTC day.
pub struct QuarantineSink {
    root: PathBuf,
}

impl QuarantineSink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        QuarantineSink { root: root.into() }
    }

    fn file_path_for_today(&self) -> PathBuf {
        let date = Utc::now().format("%Y-%m-%d");
        self.root
            .join("validation_failures")
            .join(format!("{date}.jsonl"))
    }

    /// Appends one entry, creating parent directories on first use.
    pub fn write(&self, entry: &QuarantineEntry) -> std::io::Result<()> {
        let path = self.file_path_for_today();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        let line = serde_json::to_string(entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        writeln!(file, "{line}")?;
        Ok(())
    }

    pub fn write_batch(&self, entries: &[QuarantineEntry]) -> std::io::Result<()> {
        for entry in entries {
            self.write(entry)?;
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(reason: &str) -> QuarantineEntry {
        QuarantineEntry {
            job_id: "cli_trades_ES.c.0".to_string(),
            chunk_id: "trades_2024-01-01_2024-01-01".to_string(),
            schema: "trades".to_string(),
            reason: reason.to_string(),
            errors: Vec::new(),
            raw_record: FlatRecord::new(),
        }
    }

    #[test]
    fn write_creates_a_date_rotated_jsonl_file_under_validation_failures() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = QuarantineSink::new(dir.path());

        sink.write(&entry("validation_error")).expect("write should succeed");

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let expected = dir.path().join("validation_failures").join(format!("{today}.jsonl"));
        assert!(expected.exists());

        let contents = std::fs::read_to_string(&expected).expect("read back");
        let line = contents.lines().next().expect("one line written");
        let decoded: QuarantineEntry = serde_json::from_str(line).expect("valid json line");
        assert_eq!(decoded.job_id, "cli_trades_ES.c.0");
        assert_eq!(decoded.reason, "validation_error");
    }

    #[test]
    fn write_batch_appends_every_entry_to_the_same_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let sink = QuarantineSink::new(dir.path());

        sink.write_batch(&[entry("a"), entry("b"), entry("c")])
            .expect("batch write should succeed");

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let path = dir.path().join("validation_failures").join(format!("{today}.jsonl"));
        let contents = std::fs::read_to_string(&path).expect("read back");
        assert_eq!(contents.lines().count(), 3);
    }

    #[test]
    fn root_returns_the_configured_path() {
        let sink = QuarantineSink::new("/tmp/some-root");
        assert_eq!(sink.root(), Path::new("/tmp/some-root"));
    }
}
