//! JSONL activity log: one self-contained JSON object per line.
//!
//! Each line goes out in a single `write_all`. When a destination fails the
//! writer moves on to the next one: primary path, fallback path, stderr
//! (prefixed `[QC-JSONL]`), then nothing at all. A crawl never fails because
//! logging did.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::errors::{QcError, Result};

/// Severity level for log events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

/// Activity event identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    RunStarted,
    DirectorySkipped,
    ClassificationFailed,
    FileQuarantined,
    MoveSkipped,
    MoveFailed,
    CheckpointSaved,
    CheckpointDiscarded,
    PhaseCompleted,
    Cancelled,
    RunFinished,
    Error,
}

/// A single JSONL log entry. Everything but `ts`, `event` and `severity` is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 UTC timestamp with millisecond precision.
    pub ts: String,
    pub event: EventType,
    pub severity: Severity,
    /// Affected filesystem path.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Destination path for moves.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dest: Option<String>,
    /// Item count (files discovered, classified, moved).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
    /// QC error code if the action failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Freeform details.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl LogEntry {
    /// Create a new entry stamped with the current UTC time.
    pub fn new(event: EventType, severity: Severity) -> Self {
        Self {
            ts: format_utc_now(),
            event,
            severity,
            path: None,
            dest: None,
            count: None,
            duration_ms: None,
            ok: None,
            error_code: None,
            error_message: None,
            details: None,
        }
    }
}

/// Where the writer is sending lines.
enum Sink {
    File {
        out: BufWriter<File>,
        /// Opened on the fallback path rather than the primary one.
        fallback: bool,
    },
    Stderr,
    Discard,
}

/// Configuration for the JSONL writer.
#[derive(Debug, Clone)]
pub struct JsonlConfig {
    pub path: PathBuf,
    pub fallback_path: Option<PathBuf>,
    /// A log already larger than this is rotated when a run opens it.
    pub max_size_bytes: u64,
    /// Rotated generations kept next to the live log.
    pub keep_generations: u32,
}

impl Default for JsonlConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("qcrawl-activity.jsonl"),
            fallback_path: None,
            max_size_bytes: 50 * 1024 * 1024,
            keep_generations: 5,
        }
    }
}

/// Append-only JSONL writer for one run.
///
/// The log is rotated at open time only; a single crawl appends a bounded
/// number of lines, so the live file never needs to be swapped mid-run.
pub struct JsonlWriter {
    config: JsonlConfig,
    sink: Sink,
}

impl JsonlWriter {
    /// Open the log, falling through primary → fallback → stderr.
    pub fn open(config: JsonlConfig) -> Self {
        let sink = match open_rotated(&config.path, &config) {
            Ok(out) => Sink::File {
                out,
                fallback: false,
            },
            Err(_) => open_fallback(&config),
        };
        Self { config, sink }
    }

    /// Write a single entry as one JSONL line.
    pub fn write_entry(&mut self, entry: &LogEntry) {
        match serde_json::to_string(entry) {
            Ok(mut line) => {
                line.push('\n');
                self.write_line(&line);
            }
            Err(e) => {
                let _ = writeln!(io::stderr(), "[QC-JSONL] serialize error: {e}");
            }
        }
    }

    /// Flush buffered lines and fsync the file, if there is one.
    pub fn sync(&mut self) {
        if let Sink::File { out, .. } = &mut self.sink {
            let _ = out.flush();
            let _ = out.get_ref().sync_data();
        }
    }

    /// Where lines currently go.
    pub fn state(&self) -> &'static str {
        match self.sink {
            Sink::File { fallback: false, .. } => "primary",
            Sink::File { fallback: true, .. } => "fallback",
            Sink::Stderr => "stderr",
            Sink::Discard => "discard",
        }
    }

    fn write_line(&mut self, line: &str) {
        loop {
            let written = match &mut self.sink {
                Sink::File { out, .. } => out.write_all(line.as_bytes()).is_ok(),
                Sink::Stderr => write!(io::stderr(), "[QC-JSONL] {line}").is_ok(),
                Sink::Discard => true,
            };
            if written {
                return;
            }
            self.degrade();
        }
    }

    /// Step one level down the chain after a failed write.
    fn degrade(&mut self) {
        self.sink = match self.sink {
            Sink::File {
                fallback: false, ..
            } => open_fallback(&self.config),
            Sink::File { fallback: true, .. } => {
                let _ = writeln!(io::stderr(), "[QC-JSONL] fallback write failed, using stderr");
                Sink::Stderr
            }
            Sink::Stderr | Sink::Discard => Sink::Discard,
        };
    }
}

fn open_fallback(config: &JsonlConfig) -> Sink {
    let opened = config
        .fallback_path
        .as_deref()
        .map(|path| (path, open_rotated(path, config)));
    match opened {
        Some((path, Ok(out))) => {
            let _ = writeln!(
                io::stderr(),
                "[QC-JSONL] primary log unavailable, using fallback: {}",
                path.display()
            );
            Sink::File {
                out,
                fallback: true,
            }
        }
        _ => {
            let _ = writeln!(io::stderr(), "[QC-JSONL] no writable log path, using stderr");
            Sink::Stderr
        }
    }
}

/// Open `path` for appending, rotating it first when it is already too big.
fn open_rotated(path: &Path, config: &JsonlConfig) -> Result<BufWriter<File>> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).map_err(|e| QcError::io(parent, e))?;
    }
    let size = fs::metadata(path).map_or(0, |m| m.len());
    if size > config.max_size_bytes && config.keep_generations > 0 {
        rotate(path, config.keep_generations);
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| QcError::io(path, e))?;
    Ok(BufWriter::with_capacity(64 * 1024, file))
}

/// `log` → `log.1` → ... → `log.<keep>`; the oldest generation is dropped.
fn rotate(path: &Path, keep: u32) {
    let _ = fs::remove_file(generation(path, keep));
    for i in (1..keep).rev() {
        let _ = fs::rename(generation(path, i), generation(path, i + 1));
    }
    let _ = fs::rename(path, generation(path, 1));
}

fn generation(base: &Path, index: u32) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!(".{index}"));
    PathBuf::from(name)
}

/// Current UTC time as RFC 3339 with millisecond precision.
pub fn format_utc_now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
