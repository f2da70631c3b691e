//! Activity logger thread.
//!
//! A dedicated thread owns the [`JsonlWriter`]. The engine, crawler and mover
//! send [`ActivityEvent`]s through a bounded crossbeam channel; `try_send`
//! keeps a slow disk from ever stalling the crawl.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{QcError, Result};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity};

const CHANNEL_CAPACITY: usize = 1024;

/// Events recorded in the activity log.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    RunStarted {
        root: String,
        classifier: String,
        resume: bool,
        config_hash: String,
    },
    DirectorySkipped {
        path: String,
        reason: String,
    },
    ClassificationFailed {
        path: String,
        error_code: String,
        error_message: String,
    },
    FileQuarantined {
        path: String,
        dest: String,
        duration_ms: u64,
    },
    MoveSkipped {
        path: String,
        reason: String,
    },
    MoveFailed {
        path: String,
        dest: String,
        error_code: String,
        error_message: String,
    },
    CheckpointSaved {
        path: String,
        files: u64,
        forced: bool,
        duration_ms: u64,
    },
    CheckpointDiscarded {
        path: String,
        error_code: String,
        reason: String,
    },
    PhaseCompleted {
        phase: String,
        processed: u64,
        duration_ms: u64,
    },
    Cancelled {
        phase: String,
    },
    RunFinished {
        selected: u64,
        moved: u64,
        cancelled: bool,
        duration_ms: u64,
    },
    Error {
        code: String,
        message: String,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

/// Cheaply cloneable handle for sending activity events. Never blocks.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Queue an event. A full channel drops it and bumps the dropped counter.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Events dropped due to back-pressure and not yet reported.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Join its handle afterwards.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

/// Options for the logger thread.
#[derive(Debug, Clone)]
pub struct ActivityLoggerConfig {
    pub jsonl_config: JsonlConfig,
    pub channel_capacity: usize,
}

impl Default for ActivityLoggerConfig {
    fn default() -> Self {
        Self {
            jsonl_config: JsonlConfig::default(),
            channel_capacity: CHANNEL_CAPACITY,
        }
    }
}

/// Spawn the logger thread.
///
/// Runs until `handle.shutdown()` or until every handle is dropped.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let dropped_clone = Arc::clone(&dropped);

    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: dropped,
    };

    let join = thread::Builder::new()
        .name("qc-logger".to_string())
        .spawn(move || logger_thread_main(&rx, config.jsonl_config, &dropped_clone))
        .map_err(|e| QcError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(rx: &Receiver<ActivityEvent>, jsonl_config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(jsonl_config);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{d} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }
        jsonl.write_entry(&event_to_log_entry(&event));
    }

    jsonl.sync();
}

#[allow(clippy::too_many_lines)]
fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::RunStarted {
            root,
            classifier,
            resume,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::RunStarted, Severity::Info);
            e.path = Some(root.clone());
            e.details = Some(format!(
                "version={} classifier={classifier} resume={resume} config_hash={config_hash}",
                env!("CARGO_PKG_VERSION")
            ));
            e.ok = Some(true);
            e
        }
        ActivityEvent::DirectorySkipped { path, reason } => {
            let mut e = LogEntry::new(EventType::DirectorySkipped, Severity::Warning);
            e.path = Some(path.clone());
            e.details = Some(reason.clone());
            e
        }
        ActivityEvent::ClassificationFailed {
            path,
            error_code,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::ClassificationFailed, Severity::Warning);
            e.path = Some(path.clone());
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::FileQuarantined {
            path,
            dest,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::FileQuarantined, Severity::Info);
            e.path = Some(path.clone());
            e.dest = Some(dest.clone());
            e.duration_ms = Some(*duration_ms);
            e.ok = Some(true);
            e
        }
        ActivityEvent::MoveSkipped { path, reason } => {
            let mut e = LogEntry::new(EventType::MoveSkipped, Severity::Info);
            e.path = Some(path.clone());
            e.details = Some(reason.clone());
            e
        }
        ActivityEvent::MoveFailed {
            path,
            dest,
            error_code,
            error_message,
        } => {
            let mut e = LogEntry::new(EventType::MoveFailed, Severity::Warning);
            e.path = Some(path.clone());
            e.dest = Some(dest.clone());
            e.ok = Some(false);
            e.error_code = Some(error_code.clone());
            e.error_message = Some(error_message.clone());
            e
        }
        ActivityEvent::CheckpointSaved {
            path,
            files,
            forced,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::CheckpointSaved, Severity::Info);
            e.path = Some(path.clone());
            e.count = Some(*files);
            e.duration_ms = Some(*duration_ms);
            e.details = Some(format!("forced={forced}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::CheckpointDiscarded {
            path,
            error_code,
            reason,
        } => {
            let mut e = LogEntry::new(EventType::CheckpointDiscarded, Severity::Warning);
            e.path = Some(path.clone());
            e.error_code = Some(error_code.clone());
            e.error_message = Some(reason.clone());
            e
        }
        ActivityEvent::PhaseCompleted {
            phase,
            processed,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::PhaseCompleted, Severity::Info);
            e.count = Some(*processed);
            e.duration_ms = Some(*duration_ms);
            e.details = Some(format!("phase={phase}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::Cancelled { phase } => {
            let mut e = LogEntry::new(EventType::Cancelled, Severity::Warning);
            e.details = Some(format!("phase={phase}"));
            e
        }
        ActivityEvent::RunFinished {
            selected,
            moved,
            cancelled,
            duration_ms,
        } => {
            let mut e = LogEntry::new(EventType::RunFinished, Severity::Info);
            e.count = Some(*moved);
            e.duration_ms = Some(*duration_ms);
            e.details = Some(format!("selected={selected} moved={moved} cancelled={cancelled}"));
            e.ok = Some(!cancelled);
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e.ok = Some(false);
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::RunFinished, Severity::Info),
    }
}
