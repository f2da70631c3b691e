//! Quarantine mover: relocates selected files under the destination root.
//!
//! Each file keeps its path relative to the crawl root. Pre-flight checks
//! before each move:
//! 1. Source still exists and is a regular file (the tree may be stale)
//! 2. Nothing exists at the destination (never overwrite)
//!
//! The move itself is a single `rename`. There is no copy fallback, so a
//! cross-device destination is reported as a failure and the batch goes on.

#![allow(missing_docs)]

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::control::CancellationController;
use crate::core::errors::{QcError, Result};
use crate::logger::{ActivityEvent, ActivityLoggerHandle};
use crate::report::Reporter;
use crate::tree::{FileId, PathTree};

/// One completed move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveRecord {
    pub source: PathBuf,
    pub destination: PathBuf,
}

/// Why a selected file was not moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    SourceGone,
    NotAFile,
    DestinationExists,
}

impl SkipReason {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SourceGone => "source no longer exists",
            Self::NotAFile => "source is not a regular file",
            Self::DestinationExists => "destination already exists",
        }
    }
}

/// A single move failure.
#[derive(Debug, Clone, Serialize)]
pub struct MoveError {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub error: String,
    pub error_code: String,
    pub recoverable: bool,
}

/// Summary of a relocation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MoveReport {
    pub moved: Vec<MoveRecord>,
    pub skipped: Vec<(PathBuf, SkipReason)>,
    pub errors: Vec<MoveError>,
    #[serde(skip)]
    pub duration: Duration,
    pub cancelled: bool,
}

impl MoveReport {
    /// Files handled (moved, skipped or failed).
    pub fn processed(&self) -> usize {
        self.moved.len() + self.skipped.len() + self.errors.len()
    }
}

/// Moves files into the quarantine tree.
pub struct QuarantineMover {
    destination_root: PathBuf,
    cancel: CancellationController,
    logger: Option<ActivityLoggerHandle>,
}

impl QuarantineMover {
    pub fn new(
        destination_root: impl Into<PathBuf>,
        cancel: CancellationController,
        logger: Option<ActivityLoggerHandle>,
    ) -> Self {
        Self {
            destination_root: destination_root.into(),
            cancel,
            logger,
        }
    }

    pub fn destination_root(&self) -> &Path {
        &self.destination_root
    }

    /// Where `file` lands under the destination root.
    pub fn destination_for(&self, tree: &PathTree, file: FileId) -> PathBuf {
        self.destination_root.join(tree.relative_path(file))
    }

    /// Move `files` in order. Cancellation is polled before each file.
    pub fn relocate(
        &self,
        tree: &PathTree,
        files: &[FileId],
        reporter: &mut dyn Reporter,
    ) -> MoveReport {
        let start = Instant::now();
        let mut report = MoveReport::default();

        for (done, &file) in files.iter().enumerate() {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            let source = tree.file_path(file);
            let destination = self.destination_for(tree, file);

            if let Err(skip) = preflight_check(&source, &destination) {
                reporter.report(&format!("skipped {}: {}", source.display(), skip.as_str()));
                self.log_event(ActivityEvent::MoveSkipped {
                    path: source.to_string_lossy().into_owned(),
                    reason: skip.as_str().to_string(),
                });
                report.skipped.push((source, skip));
                continue;
            }

            let move_start = Instant::now();
            match move_file(&source, &destination) {
                Ok(()) => {
                    #[allow(clippy::cast_possible_truncation)]
                    let duration_ms = move_start.elapsed().as_millis() as u64;
                    self.log_event(ActivityEvent::FileQuarantined {
                        path: source.to_string_lossy().into_owned(),
                        dest: destination.to_string_lossy().into_owned(),
                        duration_ms,
                    });
                    report.moved.push(MoveRecord {
                        source,
                        destination,
                    });
                }
                Err(e) => {
                    reporter.report(&format!("failed to move {}: {e}", source.display()));
                    self.log_event(ActivityEvent::MoveFailed {
                        path: source.to_string_lossy().into_owned(),
                        dest: destination.to_string_lossy().into_owned(),
                        error_code: e.code().to_string(),
                        error_message: e.to_string(),
                    });
                    report.errors.push(MoveError {
                        source,
                        destination,
                        error: e.to_string(),
                        error_code: e.code().to_string(),
                        recoverable: e.is_retryable(),
                    });
                }
            }

            reporter.progress(&format!("relocate: {}/{}", done + 1, files.len()));
        }

        report.duration = start.elapsed();
        report
    }

    fn log_event(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}

fn preflight_check(source: &Path, destination: &Path) -> std::result::Result<(), SkipReason> {
    match fs::symlink_metadata(source) {
        Ok(meta) if meta.is_file() => {}
        Ok(_) => return Err(SkipReason::NotAFile),
        Err(_) => return Err(SkipReason::SourceGone),
    }
    match fs::symlink_metadata(destination) {
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        _ => Err(SkipReason::DestinationExists),
    }
}

fn move_file(source: &Path, destination: &Path) -> Result<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|e| QcError::io(parent, e))?;
    }
    fs::rename(source, destination).map_err(|e| QcError::io(source, e))?;

    if fs::symlink_metadata(destination).is_err() {
        return Err(QcError::Runtime {
            details: format!("file missing after move: {}", destination.display()),
        });
    }
    Ok(())
}
