//! Timeline persistence.
//!
//! The timeline is stored as newline-delimited JSON (JSONL) for easy
//! inspection. Compaction mutates events in place, so saving rewrites the
//! whole file through a temp-file rename rather than appending. An
//! exclusive lock file enforces the single-writer discipline: one engine
//! instance owns a story's timeline at a time.

use std::io::Write;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use crate::domain::TimelineEvent;
use crate::error::TimelineError;

const TIMELINE_FILE: &str = "timeline.jsonl";
const LOCK_FILE: &str = "timeline.lock";

/// File-backed timeline log with an exclusive story lock.
pub struct EventLog {
    dir: PathBuf,
    timeline_path: PathBuf,
    /// Held for the lifetime of the log; the lock releases on drop.
    _lock: std::fs::File,
}

impl EventLog {
    /// Open (or create) the timeline log in `dir`, taking the exclusive
    /// story lock. Fails with [`TimelineError::Locked`] if another process
    /// holds it.
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, TimelineError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;

        let lock_path = dir.join(LOCK_FILE);
        let lock = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)?;
        lock.try_lock_exclusive()
            .map_err(|_| TimelineError::Locked {
                path: lock_path.display().to_string(),
            })?;

        Ok(Self {
            timeline_path: dir.join(TIMELINE_FILE),
            dir,
            _lock: lock,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load all events in stored order.
    pub async fn load(&self) -> Result<Vec<TimelineEvent>, TimelineError> {
        if !self.timeline_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.timeline_path).await?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();
        let mut events = Vec::new();

        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            events.push(serde_json::from_str(&line)?);
        }

        debug!(count = events.len(), "loaded timeline");
        Ok(events)
    }

    /// Rewrite the whole timeline atomically (write temp, then rename).
    pub fn save(&self, events: &[TimelineEvent]) -> Result<(), TimelineError> {
        let mut buffer = String::new();
        for event in events {
            buffer.push_str(&serde_json::to_string(event)?);
            buffer.push('\n');
        }

        let mut temp = tempfile::NamedTempFile::new_in(&self.dir)?;
        temp.write_all(buffer.as_bytes())?;
        temp.flush()?;
        temp.persist(&self.timeline_path)
            .map_err(|e| TimelineError::Io(e.error))?;

        debug!(count = events.len(), "saved timeline");
        Ok(())
    }
}
