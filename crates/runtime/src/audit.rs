//! Append-only audit trail.
//!
//! One JSONL file per day under the audit directory. Appends are single
//! `write` calls of one line, so interleaving across processes stays
//! readable. Rotation gzips files older than two days; deleting old `.gz`
//! files is opt-in and off by default.

use chrono::{Local, NaiveDate};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::types::unix_now;

const COMPRESS_AFTER_DAYS: i64 = 2;
const DELETE_AFTER_DAYS: i64 = 30;

/// One audit line: the pipeline's verdict for a single tool call.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub ts: f64,
    pub session_id: String,
    pub tool_name: String,
    pub decision: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gate_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}

impl AuditRecord {
    pub fn new(session_id: &str, tool_name: &str, decision: &str) -> Self {
        Self {
            ts: unix_now(),
            session_id: session_id.to_string(),
            tool_name: tool_name.to_string(),
            decision: decision.to_string(),
            gate_name: None,
            message: None,
            duration_ms: None,
            detail: Value::Null,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    dir: PathBuf,
}

impl AuditLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn today_file(&self) -> PathBuf {
        self.dir
            .join(format!("{}.jsonl", Local::now().format("%Y-%m-%d")))
    }

    /// Append one record. Failures are logged and swallowed: the audit
    /// trail must never block a hook.
    pub fn append(&self, record: &AuditRecord) {
        let write = || -> std::io::Result<()> {
            std::fs::create_dir_all(&self.dir)?;
            let mut line = serde_json::to_string(record)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
            line.push('\n');
            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.today_file())?;
            file.write_all(line.as_bytes())
        };
        if let Err(e) = write() {
            tracing::warn!(error = %e, "audit append failed");
        }
    }

    /// Gzip daily files older than two days. Deletion of ancient `.gz`
    /// files only runs when `delete_old` is set.
    pub fn rotate(&self, delete_old: bool) -> RotationSummary {
        let mut summary = RotationSummary::default();
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return summary;
        };
        let today = Local::now().date_naive();
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(age_days) = file_age_days(name, today) else {
                continue;
            };
            if name.ends_with(".jsonl") && age_days >= COMPRESS_AFTER_DAYS {
                match gzip_file(&path) {
                    Ok(()) => summary.compressed += 1,
                    Err(e) => {
                        tracing::warn!(file = name, error = %e, "audit compression failed");
                        summary.errors += 1;
                    }
                }
            } else if name.ends_with(".jsonl.gz") && delete_old && age_days >= DELETE_AFTER_DAYS {
                match std::fs::remove_file(&path) {
                    Ok(()) => summary.deleted += 1,
                    Err(_) => summary.errors += 1,
                }
            }
        }
        summary
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RotationSummary {
    pub compressed: u32,
    pub deleted: u32,
    pub errors: u32,
}

/// Age in days parsed from a `YYYY-MM-DD.jsonl[.gz]` filename.
fn file_age_days(name: &str, today: NaiveDate) -> Option<i64> {
    let date_part = name.split('.').next()?;
    let file_date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    Some((today - file_date).num_days())
}

fn gzip_file(path: &Path) -> std::io::Result<()> {
    let gz_path = {
        let mut os = path.as_os_str().to_owned();
        os.push(".gz");
        PathBuf::from(os)
    };
    let input = std::fs::read(path)?;
    let file = std::fs::File::create(&gz_path)?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(&input)?;
    encoder.finish()?;
    std::fs::remove_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_writes_one_line_per_record() {
        let tmp = TempDir::new().unwrap();
        let log = AuditLog::new(tmp.path());
        log.append(&AuditRecord::new("main", "Edit", "deny"));
        log.append(&AuditRecord::new("main", "Bash", "allow"));

        let file = log.today_file();
        let raw = std::fs::read_to_string(file).unwrap();
        let lines: Vec<_> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["decision"], "deny");
    }

    #[test]
    fn rotation_compresses_old_files_only() {
        let tmp = TempDir::new().unwrap();
        let log = AuditLog::new(tmp.path());
        let old = tmp.path().join("2020-01-01.jsonl");
        std::fs::write(&old, "{\"decision\":\"allow\"}\n").unwrap();
        let fresh = log.today_file();
        std::fs::write(&fresh, "{\"decision\":\"allow\"}\n").unwrap();

        let summary = log.rotate(false);
        assert_eq!(summary.compressed, 1);
        assert!(!old.exists());
        assert!(tmp.path().join("2020-01-01.jsonl.gz").exists());
        assert!(fresh.exists());
    }

    #[test]
    fn gz_deletion_is_dormant_by_default() {
        let tmp = TempDir::new().unwrap();
        let log = AuditLog::new(tmp.path());
        let ancient = tmp.path().join("2019-06-01.jsonl.gz");
        std::fs::write(&ancient, b"gz").unwrap();

        log.rotate(false);
        assert!(ancient.exists());

        let summary = log.rotate(true);
        assert_eq!(summary.deleted, 1);
        assert!(!ancient.exists());
    }

    #[test]
    fn unparseable_names_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let log = AuditLog::new(tmp.path());
        std::fs::write(tmp.path().join("notes.txt"), "hello").unwrap();
        let summary = log.rotate(true);
        assert_eq!(summary, RotationSummary::default());
        assert!(tmp.path().join("notes.txt").exists());
    }
}
