//! Append-only JSON-lines log of lifecycle events.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use perpsig_core::lifecycle::{EventSink, LifecycleEvent, SinkError};
use serde::Serialize;

#[derive(Serialize)]
struct Line<'a> {
    logged_at: chrono::DateTime<Utc>,
    #[serde(flatten)]
    event: &'a LifecycleEvent,
}

/// One JSON object per line, flushed after every event.
pub struct JsonlEventSink {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl JsonlEventSink {
    /// Open `path` for appending, creating it and its parent directories.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventSink for JsonlEventSink {
    fn publish(&mut self, event: &LifecycleEvent) -> Result<(), SinkError> {
        let line = Line {
            logged_at: Utc::now(),
            event,
        };
        serde_json::to_writer(&mut self.writer, &line)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}
