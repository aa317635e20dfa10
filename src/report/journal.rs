//! Append-only failure journal kept next to the downloads.

use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{ProvisionError, Result};
use crate::exec::Redactor;

/// One line per failure: timestamp, step, error kind, diagnostic.
/// Everything written passes through the redactor.
#[derive(Debug)]
pub struct RunLog {
    path: PathBuf,
    redactor: Redactor,
    lock: Mutex<()>,
}

impl RunLog {
    pub fn new(path: impl Into<PathBuf>, redactor: Redactor) -> Self {
        Self {
            path: path.into(),
            redactor,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    pub fn record_failure(&self, step: &str, error: &ProvisionError) -> Result<()> {
        self.append(step, error.kind(), &error.to_string())
    }

    /// Append a line; newlines in `message` are folded so one event stays one line
    pub fn append(&self, step: &str, kind: &str, message: &str) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|e| ProvisionError::action("run log", e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let message = self.redactor.redact(message);
        let folded: Vec<&str> = message.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        let line = format!(
            "{} [{}] {}: {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S"),
            step,
            kind,
            folded.join(" | ")
        );

        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_appends_redacted_lines() {
        let dir = tempdir().unwrap();
        let log = RunLog::new(dir.path().join("provisr.log"), Redactor::new(["ghp_secret"]));

        log.append("bat", "network", "GET https://x?token=ghp_secret failed").unwrap();
        let err = ProvisionError::StepAction {
            command: "apt-get install -y vim".into(),
            status: "exit 100".into(),
            detail: "E: Unable to locate package\nE: retry".into(),
        };
        log.record_failure("vim", &err).unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("[bat] network: GET https://x?token=******** failed"));
        assert!(!content.contains("ghp_secret"));
        assert!(lines[1].contains("[vim] action:"));
        assert!(lines[1].contains("Unable to locate package | E: retry"));
    }

    #[test]
    fn test_keeps_previous_runs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("provisr.log");
        RunLog::new(&path, Redactor::default()).append("a", "action", "one").unwrap();
        RunLog::new(&path, Redactor::default()).append("b", "action", "two").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }
}
