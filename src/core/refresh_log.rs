//! Append-only text log of refresh cycles.

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Lines shown by the log viewer unless asked otherwise.
pub const DEFAULT_TAIL: usize = 50;

pub struct RefreshLog {
    path: PathBuf,
    lock: Mutex<()>,
}

impl RefreshLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `[timestamp] [OK|ERROR] message`.
    pub fn append(&self, ok: bool, message: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Failed to open refresh log: {}", self.path.display()))?;
        writeln!(
            file,
            "[{}] [{}] {}",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            if ok { "OK" } else { "ERROR" },
            message
        )
        .with_context(|| format!("Failed to write refresh log: {}", self.path.display()))
    }

    /// Last `n` lines, oldest first. A missing log reads as empty.
    pub fn tail(&self, n: usize) -> Result<Vec<String>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e).with_context(|| {
                    format!("Failed to read refresh log: {}", self.path.display())
                });
            }
        };
        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(n);
        Ok(lines[start..].iter().map(|l| l.to_string()).collect())
    }

    pub fn clear(&self) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        if !self.path.exists() {
            return Ok(());
        }
        fs::write(&self.path, "")
            .with_context(|| format!("Failed to clear refresh log: {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_append_and_tail() {
        let dir = tempdir().unwrap();
        let log = RefreshLog::new(dir.path().join("logs/refresh.log"));

        for i in 0..5 {
            log.append(i % 2 == 0, &format!("cycle {i}")).unwrap();
        }

        let lines = log.tail(2).unwrap();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("[ERROR] cycle 3"));
        assert!(lines[1].ends_with("[OK] cycle 4"));
        assert!(lines[1].starts_with('['));
        assert_eq!(log.tail(DEFAULT_TAIL).unwrap().len(), 5);
    }

    #[test]
    fn test_missing_log_is_empty() {
        let dir = tempdir().unwrap();
        let log = RefreshLog::new(dir.path().join("refresh.log"));
        assert!(log.tail(10).unwrap().is_empty());
        log.clear().unwrap();
    }

    #[test]
    fn test_clear_truncates() {
        let dir = tempdir().unwrap();
        let log = RefreshLog::new(dir.path().join("refresh.log"));
        log.append(true, "done").unwrap();
        log.clear().unwrap();
        assert!(log.tail(10).unwrap().is_empty());
        log.append(false, "again").unwrap();
        assert_eq!(log.tail(10).unwrap().len(), 1);
    }
}
