//! Append-only diagnostic log for estimation failures.
//!
//! Every error worth post-run triage goes here with a timestamp and a
//! category tag. Writing the log must never abort the pipeline; a failed
//! append is reported through tracing and dropped.

use chrono::Utc;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

pub struct DiagnosticLog {
    path: PathBuf,
}

impl DiagnosticLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn record(&self, category: &str, message: &str) {
        let line = format!(
            "[{}] {}: {}\n",
            Utc::now().format("%Y-%m-%d %H:%M:%S"),
            category,
            message
        );
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut f| f.write_all(line.as_bytes()));
        if let Err(e) = result {
            tracing::warn!("Could not append to diagnostic log {:?}: {}", self.path, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_appends_timestamped_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.log");
        let log = DiagnosticLog::new(&path);

        log.record("shape_error", "missing estimated_low");
        log.record("quota", "daily cap reached");

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("shape_error: missing estimated_low"));
        assert!(lines[1].contains("quota: daily cap reached"));
    }

    #[test]
    fn test_unwritable_path_is_swallowed() {
        let log = DiagnosticLog::new("/nonexistent-dir/errors.log");
        // Must not panic.
        log.record("io", "this goes nowhere");
    }
}
