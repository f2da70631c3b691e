//! Phase-sequential run orchestration.
//!
//! restore → discover → classify → select → relocate. Phases never overlap.
//! Cancellation ends the current phase, forces a checkpoint and skips every
//! later phase.

#![allow(missing_docs)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::checkpoint::CheckpointStore;
use crate::classifier::pool::drain_queue;
use crate::classifier::{ClassifierKind, FileOutcome, Fingerprint};
use crate::control::CancellationController;
use crate::core::errors::{QcError, Result};
use crate::core::paths::{is_within, resolve_absolute_path};
use crate::logger::{ActivityEvent, ActivityLoggerHandle};
use crate::quarantine::mover::MoveRecord;
use crate::quarantine::{QuarantineMover, SelectionRule};
use crate::report::Reporter;
use crate::scanner::crawler::{CrawlerConfig, IncrementalCrawler};
use crate::tree::{FileId, PathTree};

/// Everything one run needs to know.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub root: PathBuf,
    pub classifier: ClassifierKind,
    pub resume: bool,
    /// Operate purely on the loaded checkpoint. Only meaningful with `resume`.
    pub skip_reconcile: bool,
    pub state_path: PathBuf,
    /// Without a destination the selection is reported, never moved.
    pub destination_root: Option<PathBuf>,
    pub save_every: usize,
    pub parallelism: usize,
    pub excluded_paths: Vec<PathBuf>,
    pub follow_symlinks: bool,
    pub config_hash: String,
}

impl RunOptions {
    pub fn new(root: impl Into<PathBuf>, classifier: ClassifierKind) -> Self {
        Self {
            root: root.into(),
            classifier,
            resume: false,
            skip_reconcile: false,
            state_path: PathBuf::from(crate::core::config::DEFAULT_STATE_FILE),
            destination_root: None,
            save_every: crate::core::config::DEFAULT_SAVE_EVERY,
            parallelism: 1,
            excluded_paths: Vec::new(),
            follow_symlinks: false,
            config_hash: String::new(),
        }
    }
}

/// Run phase, used to report where cancellation landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Discover,
    Classify,
    Relocate,
}

impl Phase {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Discover => "discover",
            Self::Classify => "classify",
            Self::Relocate => "relocate",
        }
    }
}

/// What a run did.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub root: PathBuf,
    pub classifier: ClassifierKind,
    pub selection_rule: SelectionRule,
    pub restored_pending: usize,
    pub restored_resolved: usize,
    pub checkpoint_discarded: Option<String>,
    pub directories_visited: usize,
    pub directories_skipped: usize,
    pub directories_excluded: usize,
    pub discovered: usize,
    pub classified: usize,
    pub classification_skipped: usize,
    pub classification_failed: usize,
    pub duplicate_groups: usize,
    pub selected: Vec<PathBuf>,
    pub retained: Vec<PathBuf>,
    pub moved: Vec<MoveRecord>,
    pub move_skipped: usize,
    pub move_failed: usize,
    pub checkpoints_saved: usize,
    pub cancelled_in: Option<Phase>,
    pub duration_ms: u64,
}

impl RunSummary {
    fn new(options: &RunOptions) -> Self {
        Self {
            root: options.root.clone(),
            classifier: options.classifier,
            selection_rule: SelectionRule::for_kind(options.classifier),
            restored_pending: 0,
            restored_resolved: 0,
            checkpoint_discarded: None,
            directories_visited: 0,
            directories_skipped: 0,
            directories_excluded: 0,
            discovered: 0,
            classified: 0,
            classification_skipped: 0,
            classification_failed: 0,
            duplicate_groups: 0,
            selected: Vec::new(),
            retained: Vec::new(),
            moved: Vec::new(),
            move_skipped: 0,
            move_failed: 0,
            checkpoints_saved: 0,
            cancelled_in: None,
            duration_ms: 0,
        }
    }

    pub fn cancelled(&self) -> bool {
        self.cancelled_in.is_some()
    }
}

/// Drives one run over a crawl root.
pub struct Engine<'r> {
    options: RunOptions,
    cancel: CancellationController,
    logger: Option<ActivityLoggerHandle>,
    reporter: &'r mut dyn Reporter,
    heartbeat: Option<Arc<dyn Fn() + Send + Sync>>,
    store: CheckpointStore,
    summary: RunSummary,
}

impl<'r> Engine<'r> {
    pub fn new(
        mut options: RunOptions,
        cancel: CancellationController,
        reporter: &'r mut dyn Reporter,
    ) -> Self {
        options.root = resolve_absolute_path(&options.root);
        options.state_path = resolve_absolute_path(&options.state_path);
        options.destination_root = options
            .destination_root
            .as_deref()
            .map(resolve_absolute_path);
        options.save_every = options.save_every.max(1);
        options.parallelism = options.parallelism.max(1);

        let store = CheckpointStore::new(&options.state_path);
        let summary = RunSummary::new(&options);
        Self {
            options,
            cancel,
            logger: None,
            reporter,
            heartbeat: None,
            store,
            summary,
        }
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Option<ActivityLoggerHandle>) -> Self {
        self.logger = logger;
        self
    }

    /// Callback invoked once per crawled directory.
    #[must_use]
    pub fn with_heartbeat<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.heartbeat = Some(Arc::new(callback));
        self
    }

    /// Execute every phase and return what happened.
    ///
    /// Only an unusable destination root is an error; every other failure is
    /// reported and the run continues.
    pub fn run(mut self) -> Result<RunSummary> {
        let start = Instant::now();
        self.prepare_destination()?;
        self.log_event(ActivityEvent::RunStarted {
            root: self.options.root.to_string_lossy().into_owned(),
            classifier: self.options.classifier.as_str().to_string(),
            resume: self.options.resume,
            config_hash: self.options.config_hash.clone(),
        });

        let (mut tree, restored_pending, mut resolved) = self.restore();

        let discovered = if self.options.resume && self.options.skip_reconcile {
            Vec::new()
        } else {
            match self.discover(&mut tree) {
                Some(discovered) => discovered,
                None => return Ok(self.finish(start)),
            }
        };

        let queue: Vec<FileId> = restored_pending.into_iter().chain(discovered).collect();
        if !self.classify(&mut tree, queue, &mut resolved)? {
            return Ok(self.finish(start));
        }

        let rule = SelectionRule::for_kind(self.options.classifier);
        let selection = rule.select_present(&resolved, |id| source_present(&tree.file_path(id)));
        self.summary.duplicate_groups = selection.duplicate_groups;
        self.summary.selected = selection.selected.iter().map(|&id| tree.file_path(id)).collect();
        self.summary.retained = selection.retained.iter().map(|&id| tree.file_path(id)).collect();

        if let Some(destination) = self.options.destination_root.clone() {
            self.relocate(&tree, &destination, &selection.selected);
        }

        Ok(self.finish(start))
    }

    fn prepare_destination(&self) -> Result<()> {
        let Some(destination) = &self.options.destination_root else {
            return Ok(());
        };
        if is_within(&self.options.root, destination) {
            return Err(QcError::InvalidConfig {
                details: format!(
                    "destination root {} must not contain the crawl root {}",
                    destination.display(),
                    self.options.root.display()
                ),
            });
        }
        fs::create_dir_all(destination).map_err(|e| QcError::DestinationUnavailable {
            path: destination.clone(),
            details: e.to_string(),
        })
    }

    /// Seed the tree from the checkpoint when resuming. A checkpoint that
    /// cannot be trusted is discarded with a warning.
    fn restore(&mut self) -> (PathTree, Vec<FileId>, Vec<(FileId, Fingerprint)>) {
        let fresh = || (PathTree::new(&self.options.root), Vec::new(), Vec::new());
        if !self.options.resume {
            return fresh();
        }

        match self.store.load(&self.options.root, self.options.classifier) {
            Ok(Some(restored)) => {
                self.summary.restored_pending = restored.pending.len();
                self.summary.restored_resolved = restored.resolved.len();
                self.reporter.progress(&format!(
                    "resumed {} files from checkpoint written {}",
                    restored.tree.file_count(),
                    restored.generated_at
                ));
                (restored.tree, restored.pending, restored.resolved)
            }
            Ok(None) => fresh(),
            Err(err) => {
                self.reporter
                    .report(&format!("warning: checkpoint discarded, starting fresh: {err}"));
                self.log_event(ActivityEvent::CheckpointDiscarded {
                    path: self.store.path().to_string_lossy().into_owned(),
                    error_code: err.code().to_string(),
                    reason: err.to_string(),
                });
                self.summary.checkpoint_discarded = Some(err.to_string());
                (PathTree::new(&self.options.root), Vec::new(), Vec::new())
            }
        }
    }

    /// Reconcile the tree with disk. `None` when the crawl was cancelled.
    fn discover(&mut self, tree: &mut PathTree) -> Option<Vec<FileId>> {
        let started = Instant::now();
        let mut excluded_paths = self.options.excluded_paths.clone();
        if let Some(destination) = &self.options.destination_root {
            excluded_paths.push(destination.clone());
        }
        let crawler = IncrementalCrawler::new(
            CrawlerConfig {
                excluded_paths,
                follow_symlinks: self.options.follow_symlinks,
            },
            self.cancel.clone(),
        )
        .with_logger(self.logger.clone())
        .with_heartbeat_arc(self.heartbeat.clone());

        let report = crawler.crawl(tree, &mut *self.reporter);
        self.summary.directories_visited = report.directories_visited;
        self.summary.directories_skipped = report.directories_skipped;
        self.summary.directories_excluded = report.directories_excluded;
        self.summary.discovered = report.discovered.len();

        if report.cancelled {
            self.cancelled(Phase::Discover, tree);
            return None;
        }
        self.phase_completed(Phase::Discover, report.discovered.len(), started);
        if !report.discovered.is_empty() {
            self.save_checkpoint(tree, false);
        }
        Some(report.discovered)
    }

    /// Classify `queue` in FIFO order. `Ok(false)` when cancelled.
    fn classify(
        &mut self,
        tree: &mut PathTree,
        queue: Vec<FileId>,
        resolved: &mut Vec<(FileId, Fingerprint)>,
    ) -> Result<bool> {
        let started = Instant::now();
        let total = queue.len();
        let classifier = self.options.classifier.classifier();
        let parallelism = self.options.parallelism;
        let save_every = self.options.save_every;
        let cancel = self.cancel.clone();
        let jobs: Vec<(FileId, PathBuf)> =
            queue.into_iter().map(|id| (id, tree.file_path(id))).collect();

        let mut since_save = 0usize;
        let mut processed = 0usize;
        let drained = drain_queue(
            classifier.as_ref(),
            jobs,
            parallelism,
            || cancel.is_cancelled(),
            |id, path, outcome| {
                processed += 1;
                match outcome {
                    FileOutcome::Resolved(fingerprint) => {
                        tree.set_classification(id, fingerprint);
                        resolved.push((id, fingerprint));
                        self.summary.classified += 1;
                        since_save += 1;
                    }
                    FileOutcome::Skipped(_) => self.summary.classification_skipped += 1,
                    FileOutcome::Failed(err) => {
                        self.summary.classification_failed += 1;
                        self.reporter.report(&format!("error: {err}"));
                        self.log_event(ActivityEvent::ClassificationFailed {
                            path: path.to_string_lossy().into_owned(),
                            error_code: err.code().to_string(),
                            error_message: err.to_string(),
                        });
                    }
                }
                self.reporter
                    .progress(&format!("classify: {processed}/{total}"));
                if since_save >= save_every {
                    self.save_checkpoint(tree, false);
                    since_save = 0;
                }
            },
        )?;

        if drained.stopped || self.cancel.is_cancelled() {
            self.cancelled(Phase::Classify, tree);
            return Ok(false);
        }
        self.phase_completed(Phase::Classify, drained.applied, started);
        if drained.applied > 0 {
            self.save_checkpoint(tree, false);
        }
        Ok(true)
    }

    fn relocate(&mut self, tree: &PathTree, destination: &Path, selected: &[FileId]) {
        let started = Instant::now();
        let mover = QuarantineMover::new(destination, self.cancel.clone(), self.logger.clone());
        let report = mover.relocate(tree, selected, &mut *self.reporter);
        let processed = report.processed();
        self.summary.move_skipped = report.skipped.len();
        self.summary.move_failed = report.errors.len();
        self.summary.moved = report.moved;

        if report.cancelled {
            self.cancelled(Phase::Relocate, tree);
            return;
        }
        self.phase_completed(Phase::Relocate, processed, started);
        if processed > 0 {
            self.save_checkpoint(tree, false);
        }
    }

    /// Record the cancelled phase and force a save.
    fn cancelled(&mut self, phase: Phase, tree: &PathTree) {
        self.summary.cancelled_in = Some(phase);
        self.reporter
            .report(&format!("cancelled during {}; saving checkpoint", phase.as_str()));
        self.log_event(ActivityEvent::Cancelled {
            phase: phase.as_str().to_string(),
        });
        self.save_checkpoint(tree, true);
    }

    /// Persist the tree while holding the cancellation lock, so a cancel
    /// request is never latched half-way through a save.
    fn save_checkpoint(&mut self, tree: &PathTree, forced: bool) {
        let cancel = self.cancel.clone();
        cancel.guarded(|_| self.write_checkpoint(tree, forced));
    }

    fn write_checkpoint(&mut self, tree: &PathTree, forced: bool) {
        let started = Instant::now();
        match self.store.save(tree, self.options.classifier) {
            Ok(stats) => {
                self.summary.checkpoints_saved += 1;
                self.log_event(ActivityEvent::CheckpointSaved {
                    path: self.store.path().to_string_lossy().into_owned(),
                    files: stats.files as u64,
                    forced,
                    duration_ms: elapsed_ms(started),
                });
            }
            Err(err) => {
                self.reporter
                    .report(&format!("warning: checkpoint not saved: {err}"));
                self.log_event(ActivityEvent::Error {
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
            }
        }
    }

    fn phase_completed(&mut self, phase: Phase, processed: usize, started: Instant) {
        self.log_event(ActivityEvent::PhaseCompleted {
            phase: phase.as_str().to_string(),
            processed: processed as u64,
            duration_ms: elapsed_ms(started),
        });
    }

    fn finish(mut self, start: Instant) -> RunSummary {
        self.summary.duration_ms = elapsed_ms(start);
        self.log_event(ActivityEvent::RunFinished {
            selected: self.summary.selected.len() as u64,
            moved: self.summary.moved.len() as u64,
            cancelled: self.summary.cancelled(),
            duration_ms: self.summary.duration_ms,
        });
        self.summary
    }

    fn log_event(&self, event: ActivityEvent) {
        if let Some(logger) = &self.logger {
            logger.send(event);
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
/// Whether a selected record still has a regular file at its original path.
fn source_present(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|meta| meta.is_file())
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
