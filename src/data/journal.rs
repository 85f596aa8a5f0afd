//! Append-only run journal: the error log and the completion marker.

use crate::error::AppResult;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Text files that outlive a run.
#[derive(Debug, Clone)]
pub struct RunJournal {
    error_log: PathBuf,
    finish_marker: PathBuf,
}

impl RunJournal {
    /// Journal writing to the two given files. Neither is created until the
    /// first line is appended.
    pub fn new(error_log: impl Into<PathBuf>, finish_marker: impl Into<PathBuf>) -> Self {
        Self {
            error_log: error_log.into(),
            finish_marker: finish_marker.into(),
        }
    }

    /// Error log path.
    pub fn error_log(&self) -> &Path {
        &self.error_log
    }

    /// Completion marker path.
    pub fn finish_marker(&self) -> &Path {
        &self.finish_marker
    }

    /// Log a setpoint whose generator commands could not be delivered.
    pub fn record_transport_fault(&self, frequency: f64, phase: f64) -> AppResult<()> {
        append_line(
            &self.error_log,
            &format!("Measurement Error!f:{},p:{}", frequency, phase),
        )
    }

    /// Mark the run as finished after `seconds`.
    pub fn record_completion(&self, seconds: f64) -> AppResult<()> {
        append_line(
            &self.finish_marker,
            &format!("Measurement done in {} seconds", seconds),
        )
    }
}

fn append_line(path: &Path, line: &str) -> AppResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{line}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_lines_are_appended() {
        let dir = tempdir().unwrap();
        let journal = RunJournal::new(dir.path().join("Error.txt"), dir.path().join("Finish.txt"));
        assert!(!journal.error_log().exists());

        journal.record_transport_fault(110.0, 90.0).unwrap();
        journal.record_transport_fault(250.5, 0.25).unwrap();
        journal.record_completion(12.5).unwrap();

        let errors = std::fs::read_to_string(journal.error_log()).unwrap();
        assert_eq!(
            errors.lines().collect::<Vec<_>>(),
            vec!["Measurement Error!f:110,p:90", "Measurement Error!f:250.5,p:0.25"]
        );
        let finish = std::fs::read_to_string(journal.finish_marker()).unwrap();
        assert_eq!(finish.trim_end(), "Measurement done in 12.5 seconds");
    }

    #[test]
    fn test_existing_log_is_kept() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("Error.txt");
        std::fs::write(&log, "earlier run\n").unwrap();
        let journal = RunJournal::new(&log, dir.path().join("Finish.txt"));
        journal.record_transport_fault(100.0, 1.0).unwrap();

        let content = std::fs::read_to_string(&log).unwrap();
        assert_eq!(content.lines().count(), 2);
        assert!(content.starts_with("earlier run"));
    }
}
