use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{ConvertError, Result};
use crate::job::JobResult;

/// Number of entries kept in the history file
pub const HISTORY_LIMIT: usize = 100;

/// Append-only conversion log stored as a JSON array, oldest entry first
#[derive(Debug, Clone)]
pub struct HistoryRecorder {
    path: PathBuf,
}

impl HistoryRecorder {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Add a result, keeping only the newest `HISTORY_LIMIT` entries
    pub fn append(&self, result: &JobResult) -> Result<()> {
        let mut entries = self.read_entries().unwrap_or_else(|e| {
            warn!("Discarding unreadable history {}: {}", self.path.display(), e);
            Vec::new()
        });

        entries.push(result.clone());
        if entries.len() > HISTORY_LIMIT {
            let excess = entries.len() - HISTORY_LIMIT;
            entries.drain(..excess);
        }

        self.write_entries(&entries)?;
        debug!("Added to history: {}", result.input_name);
        Ok(())
    }

    /// Entries with the most recent first; unreadable history counts as empty
    pub fn load(&self) -> Vec<JobResult> {
        match self.read_entries() {
            Ok(mut entries) => {
                entries.reverse();
                entries
            }
            Err(e) => {
                warn!("Could not load history from {}: {}", self.path.display(), e);
                Vec::new()
            }
        }
    }

    /// Remove the history file
    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| {
                ConvertError::History(format!("Failed to remove {}: {}", self.path.display(), e))
            })?;
            info!("History cleared");
        }
        Ok(())
    }

    fn read_entries(&self) -> Result<Vec<JobResult>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    /// Write through a temporary file in the same directory, then rename over the old file
    fn write_entries(&self, entries: &[JobResult]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir)?;

        let mut temp = tempfile::NamedTempFile::new_in(&dir)?;
        serde_json::to_writer_pretty(&mut temp, entries)?;
        temp.write_all(b"\n")?;
        temp.flush()?;
        temp.persist(&self.path).map_err(|e| {
            ConvertError::History(format!("Failed to write {}: {}", self.path.display(), e))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConversionSettings;
    use crate::job::{JobDescription, JobStatus};

    fn result(n: usize) -> JobResult {
        let job = JobDescription::into_directory(
            format!("/videos/clip{}.mkv", n),
            "/out",
            &ConversionSettings::default(),
        );
        JobResult::success(&job, "1.0 MB".to_string())
    }

    #[test]
    fn test_keeps_last_hundred() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = HistoryRecorder::new(dir.path().join("history.json"));

        for n in 0..105 {
            recorder.append(&result(n)).unwrap();
        }

        let entries = recorder.load();
        assert_eq!(entries.len(), HISTORY_LIMIT);
        assert_eq!(entries.first().unwrap().input_name, "clip104.mkv");
        assert_eq!(entries.last().unwrap().input_name, "clip5.mkv");

        // storage order is oldest first
        let raw: Vec<JobResult> =
            serde_json::from_str(&std::fs::read_to_string(recorder.path()).unwrap()).unwrap();
        assert_eq!(raw.first().unwrap().input_name, "clip5.mkv");
        assert_eq!(raw.last().unwrap().input_name, "clip104.mkv");
    }

    #[test]
    fn test_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = HistoryRecorder::new(dir.path().join("none.json"));
        assert!(recorder.load().is_empty());
    }

    #[test]
    fn test_corrupt_file_is_empty_and_recoverable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        std::fs::write(&path, "{ not valid").unwrap();

        let recorder = HistoryRecorder::new(&path);
        assert!(recorder.load().is_empty());

        recorder.append(&result(1)).unwrap();
        assert_eq!(recorder.load().len(), 1);
    }

    #[test]
    fn test_clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = HistoryRecorder::new(dir.path().join("history.json"));
        recorder.append(&result(1)).unwrap();
        assert!(recorder.path().exists());

        recorder.clear().unwrap();
        assert!(!recorder.path().exists());
        assert!(recorder.load().is_empty());
        recorder.clear().unwrap();
    }

    #[test]
    fn test_record_format() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = HistoryRecorder::new(dir.path().join("nested").join("history.json"));
        recorder.append(&result(7)).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(recorder.path()).unwrap()).unwrap();
        let entry = &raw[0];
        assert_eq!(entry["input_file"], "clip7.mkv");
        assert_eq!(entry["output_file"], "clip7.mov");
        assert_eq!(entry["status"], "Success");
        assert_eq!(entry["size"], "1.0 MB");
        assert!(entry["date"].is_string());
        assert!(entry.get("error").is_none());

        assert_eq!(recorder.load()[0].status, JobStatus::Success);
    }
}
