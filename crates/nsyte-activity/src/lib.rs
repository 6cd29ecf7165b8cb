//! Activity logging for publish and download runs (A1).
//!
//! Append-only JSONL, independent of whatever the progress reporter
//! printed to a terminal, so a run can be diagnosed after the fact.
//!
//! ```
//! use nsyte_activity::ActivityLog;
//! use nsyte_types::{ActivityEntry, ActivityEvent};
//! use chrono::Utc;
//!
//! let mut log = ActivityLog::new();
//! log.record(ActivityEntry {
//!     timestamp: Utc::now(),
//!     run_id: "run-1".to_string(),
//!     event: ActivityEvent::RunStarted,
//! });
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use nsyte_types::ActivityEntry;

pub const ACTIVITY_FILE: &str = "activity.jsonl";

pub fn activity_path(state_dir: &Path) -> PathBuf {
    state_dir.join(ACTIVITY_FILE)
}

/// In-memory buffer of activity entries, flushed to disk in append
/// mode.
#[derive(Debug, Default)]
pub struct ActivityLog {
    entries: Vec<ActivityEntry>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn record(&mut self, entry: ActivityEntry) {
        self.entries.push(entry);
    }

    /// Appends every buffered entry to `path`, creating parent
    /// directories as needed. Does not clear the in-memory buffer.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create activity log dir {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open activity log {}", path.display()))?;

        let mut writer = std::io::BufWriter::new(file);
        for entry in &self.entries {
            let line = serde_json::to_string(entry).context("failed to serialize activity entry")?;
            writeln!(writer, "{line}").context("failed to write activity entry")?;
        }
        writer.flush().context("failed to flush activity log")?;

        Ok(())
    }

    /// Reads every entry from `path`. A missing file is an empty log,
    /// not an error — a run's first write creates it.
    pub fn read_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let file = File::open(path)
            .with_context(|| format!("failed to open activity log {}", path.display()))?;
        let reader = BufReader::new(file);
        let mut entries = Vec::new();

        for line in reader.lines() {
            let line = line.with_context(|| {
                format!("failed to read line from activity log {}", path.display())
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let entry: ActivityEntry = serde_json::from_str(&line)
                .with_context(|| format!("failed to parse activity entry: {line}"))?;
            entries.push(entry);
        }

        Ok(Self { entries })
    }

    pub fn entries_for_run<'a>(&'a self, run_id: &str) -> Vec<&'a ActivityEntry> {
        self.entries.iter().filter(|e| e.run_id == run_id).collect()
    }

    pub fn all_entries(&self) -> &[ActivityEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use nsyte_types::ActivityEvent;

    fn sample(run_id: &str, event: ActivityEvent) -> ActivityEntry {
        ActivityEntry { timestamp: Utc::now(), run_id: run_id.to_string(), event }
    }

    #[test]
    fn new_log_is_empty() {
        let log = ActivityLog::new();
        assert!(log.is_empty());
        assert_eq!(log.len(), 0);
    }

    #[test]
    fn record_appends_to_buffer() {
        let mut log = ActivityLog::new();
        log.record(sample("r1", ActivityEvent::RunStarted));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn entries_for_run_filters_correctly() {
        let mut log = ActivityLog::new();
        log.record(sample("r1", ActivityEvent::RunStarted));
        log.record(sample("r2", ActivityEvent::RunStarted));
        log.record(sample("r1", ActivityEvent::ScanCompleted { file_count: 2 }));

        assert_eq!(log.entries_for_run("r1").len(), 2);
        assert_eq!(log.entries_for_run("r2").len(), 1);
    }

    #[test]
    fn write_then_read_round_trips() {
        let td = tempfile::tempdir().expect("tempdir");
        let path = activity_path(td.path());

        let mut log = ActivityLog::new();
        log.record(sample("r1", ActivityEvent::RunStarted));
        log.record(sample("r1", ActivityEvent::PlanComputed { uploads: 2, publishes: 2, deletes: 0 }));
        log.write_to_file(&path).expect("write");

        let loaded = ActivityLog::read_from_file(&path).expect("read");
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn write_appends_across_calls() {
        let td = tempfile::tempdir().expect("tempdir");
        let path = activity_path(td.path());

        let mut first = ActivityLog::new();
        first.record(sample("r1", ActivityEvent::RunStarted));
        first.write_to_file(&path).expect("write first");

        let mut second = ActivityLog::new();
        second.record(sample("r1", ActivityEvent::RunFinished { result: nsyte_types::RunResult::Success }));
        second.write_to_file(&path).expect("write second");

        let loaded = ActivityLog::read_from_file(&path).expect("read");
        assert_eq!(loaded.len(), 2);
    }

    #[test]
    fn read_from_missing_file_returns_empty_log() {
        let td = tempfile::tempdir().expect("tempdir");
        let loaded = ActivityLog::read_from_file(&td.path().join("nope.jsonl")).expect("read");
        assert!(loaded.is_empty());
    }

    #[test]
    fn path_helper_joins_expected_filename() {
        let base = PathBuf::from("x");
        assert_eq!(activity_path(&base), PathBuf::from("x").join(ACTIVITY_FILE));
    }
}
