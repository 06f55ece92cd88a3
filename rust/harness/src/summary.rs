//! Scalar summary sink.
//!
//! Events go to `events.jsonl` in the log directory, one JSON object per
//! line, so runs can be compared or plotted without a custom reader.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use chrono::Utc;
use serde::Serialize;

/// File name of the event log inside the log directory.
pub const EVENT_FILE: &str = "events.jsonl";

#[derive(Serialize)]
struct Event<'a> {
    wall_time: String,
    step: u64,
    tag: &'a str,
    value: f64,
}

/// Writes scalar events for one evaluation run.
pub struct SummaryWriter {
    writer: BufWriter<File>,
    path: PathBuf,
}

impl SummaryWriter {
    /// Create the log directory if needed and start a fresh event file.
    pub fn create(log_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(log_dir)?;
        let path = log_dir.join(EVENT_FILE);
        let file = File::create(&path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one scalar event and flush it, so aborted runs keep every
    /// event written before the failure.
    pub fn scalar(&mut self, step: u64, tag: &str, value: f64) -> std::io::Result<()> {
        let event = Event {
            wall_time: Utc::now().to_rfc3339(),
            step,
            tag,
            value,
        };
        let line = serde_json::to_string(&event).map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()
    }
}
