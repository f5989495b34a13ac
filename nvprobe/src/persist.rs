//! Writes result sets as timestamped JSON artifacts.

use crate::results::ResultSet;
use chrono::{DateTime, Local};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_RESULT_PREFIX: &str = "nvme_test";
pub const BENCH_RESULT_PREFIX: &str = "ssd_perf";

const SYSTEM_LOG_DIR: &str = "/var/log/nvme_test_logs";
const USER_LOG_DIR_NAME: &str = "nvme_test_logs";

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("cannot create result directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("result directory {path} is not writable: {source}")]
    NotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize results: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("could not determine a home directory for results")]
    NoHomeDir,
}

/// `/var/log/nvme_test_logs` for root, `~/nvme_test_logs` otherwise.
pub fn default_log_dir() -> Result<PathBuf, PersistenceError> {
    if running_as_root() {
        return Ok(PathBuf::from(SYSTEM_LOG_DIR));
    }
    directories::BaseDirs::new()
        .map(|dirs| dirs.home_dir().join(USER_LOG_DIR_NAME))
        .ok_or(PersistenceError::NoHomeDir)
}

#[cfg(unix)]
fn running_as_root() -> bool {
    use std::os::unix::fs::MetadataExt;
    fs::metadata("/proc/self").is_ok_and(|meta| meta.uid() == 0)
}

#[cfg(not(unix))]
fn running_as_root() -> bool {
    false
}

/// Create `dir` if needed and prove it accepts writes.
pub fn ensure_log_directory(dir: &Path) -> Result<(), PersistenceError> {
    fs::create_dir_all(dir).map_err(|source| PersistenceError::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let marker = dir.join(format!(".nvprobe_write_test_{}", std::process::id()));
    fs::write(&marker, b"")
        .and_then(|()| fs::remove_file(&marker))
        .map_err(|source| PersistenceError::NotWritable {
            path: dir.to_path_buf(),
            source,
        })?;
    debug!(dir = %dir.display(), "Result directory ready");
    Ok(())
}

/// `<prefix>_<YYYYMMDD_HHMMSS>.json`
pub fn artifact_name(prefix: &str, at: DateTime<Local>) -> String {
    format!("{prefix}_{}.json", at.format("%Y%m%d_%H%M%S"))
}

#[derive(Debug, Clone)]
pub struct ResultWriter {
    dir: PathBuf,
    prefix: String,
}

impl ResultWriter {
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write `results` stamped with the current local time.
    pub fn write(&self, results: &ResultSet) -> Result<PathBuf, PersistenceError> {
        self.write_at(results, Local::now())
    }

    pub fn write_at(&self, results: &ResultSet, at: DateTime<Local>) -> Result<PathBuf, PersistenceError> {
        let path = self.dir.join(artifact_name(&self.prefix, at));

        let mut buf = Vec::new();
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(b"    "));
        results.serialize(&mut ser)?;
        buf.push(b'\n');

        fs::File::create(&path)
            .and_then(|mut file| file.write_all(&buf))
            .map_err(|source| PersistenceError::Write {
                path: path.clone(),
                source,
            })?;
        info!(path = %path.display(), entries = results.len(), "Results saved");
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{FailureRecord, ResultEntry};
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::TempDir;

    fn sample() -> ResultSet {
        let mut results = ResultSet::new();
        results
            .record_health([("critical_warning", json!(0))].into_iter().collect())
            .unwrap();
        results
            .insert("randwrite_4K", ResultEntry::Failure(FailureRecord::new("boom")))
            .unwrap();
        results
    }

    #[test]
    fn test_artifact_name() {
        let at = Local.with_ymd_and_hms(2024, 3, 7, 9, 5, 2).unwrap();
        assert_eq!(artifact_name("nvme_test", at), "nvme_test_20240307_090502.json");
        assert_eq!(artifact_name(BENCH_RESULT_PREFIX, at), "ssd_perf_20240307_090502.json");
    }

    #[test]
    fn test_write_pretty_json_with_four_space_indent() {
        let dir = TempDir::new().unwrap();
        let writer = ResultWriter::new(dir.path(), DEFAULT_RESULT_PREFIX);
        let at = Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let path = writer.write_at(&sample(), at).unwrap();

        assert_eq!(path, dir.path().join("nvme_test_20240102_030405.json"));
        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("{\n    \"health_status\": {\n        \"type\": \"health_status\""));
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["randwrite_4K"], json!({ "error": "boom" }));
    }

    #[test]
    fn test_ensure_log_directory_creates_nested() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("a").join("b");
        ensure_log_directory(&nested).unwrap();
        assert!(nested.is_dir());
        assert_eq!(fs::read_dir(&nested).unwrap().count(), 0);
    }

    #[test]
    fn test_ensure_log_directory_rejects_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("occupied");
        fs::write(&file, "x").unwrap();
        assert!(matches!(
            ensure_log_directory(&file),
            Err(PersistenceError::CreateDir { .. })
        ));
    }

    #[test]
    fn test_write_into_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let writer = ResultWriter::new(dir.path().join("gone"), DEFAULT_RESULT_PREFIX);
        assert!(matches!(writer.write(&sample()), Err(PersistenceError::Write { .. })));
    }
}
