//! Incremental crawler: reconciles the path tree against the live filesystem.
//!
//! Breadth-first over an explicit FIFO of directories. Every directory is
//! enumerated at most once per run; files already present in the tree are
//! left untouched, so re-crawling an unchanged root discovers nothing.

#![allow(missing_docs)]

use std::collections::{HashSet, VecDeque};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::control::CancellationController;
use crate::core::paths::is_within;
use crate::logger::{ActivityEvent, ActivityLoggerHandle};
use crate::report::Reporter;
use crate::tree::{FileId, PathTree};

/// Crawler settings derived from the run configuration.
#[derive(Debug, Clone, Default)]
pub struct CrawlerConfig {
    /// Absolute directories never entered. The quarantine root belongs here.
    pub excluded_paths: Vec<PathBuf>,
    pub follow_symlinks: bool,
}

/// Outcome of one crawl pass.
#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    pub directories_visited: usize,
    /// Directories not entered because they were excluded.
    pub directories_excluded: usize,
    /// Directories that could not be enumerated.
    pub directories_skipped: usize,
    /// Entries ignored because their names cannot be stored.
    pub entries_skipped: usize,
    /// Records inserted by this pass, in discovery order.
    pub discovered: Vec<FileId>,
    pub cancelled: bool,
}

/// Breadth-first crawler with exclusion, cancellation and symlink handling.
pub struct IncrementalCrawler {
    config: CrawlerConfig,
    cancel: CancellationController,
    logger: Option<ActivityLoggerHandle>,
    heartbeat: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl IncrementalCrawler {
    pub fn new(config: CrawlerConfig, cancel: CancellationController) -> Self {
        Self {
            config,
            cancel,
            logger: None,
            heartbeat: None,
        }
    }

    #[must_use]
    pub fn with_logger(mut self, logger: Option<ActivityLoggerHandle>) -> Self {
        self.logger = logger;
        self
    }

    /// Callback invoked once per directory taken off the queue.
    #[must_use]
    pub fn with_heartbeat<F>(mut self, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.heartbeat = Some(Arc::new(callback));
        self
    }

    #[must_use]
    pub fn with_heartbeat_arc(mut self, callback: Option<Arc<dyn Fn() + Send + Sync>>) -> Self {
        self.heartbeat = callback;
        self
    }

    /// Walk from the tree's root, inserting every file the tree does not know.
    pub fn crawl(&self, tree: &mut PathTree, reporter: &mut dyn Reporter) -> CrawlReport {
        let mut report = CrawlReport::default();
        let root = tree.root_path().to_path_buf();
        let mut queue: VecDeque<PathBuf> = VecDeque::from([root.clone()]);
        let mut visited: HashSet<PathBuf> = HashSet::new();
        if self.config.follow_symlinks {
            visited.insert(fs::canonicalize(&root).unwrap_or_else(|_| root.clone()));
        }

        'dirs: loop {
            if self.cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let Some(dir) = queue.pop_front() else {
                break;
            };
            if let Some(hb) = &self.heartbeat {
                hb();
            }

            if self.is_excluded(&dir) {
                report.directories_excluded += 1;
                continue;
            }

            let entries = match fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(err) => {
                    let reason = match err.kind() {
                        ErrorKind::PermissionDenied => "permission denied".to_string(),
                        ErrorKind::NotFound => "not found".to_string(),
                        _ => err.to_string(),
                    };
                    report.directories_skipped += 1;
                    self.note_skip(&dir, &reason, reporter);
                    continue;
                }
            };
            report.directories_visited += 1;

            let mut files = Vec::new();
            for entry in entries {
                let Ok(entry) = entry else {
                    continue;
                };
                let path = entry.path();
                if entry.file_name().to_str().is_none() {
                    report.entries_skipped += 1;
                    self.note_skip(&path, "name is not valid UTF-8", reporter);
                    continue;
                }
                let Ok(file_type) = entry.file_type() else {
                    continue;
                };

                if file_type.is_symlink() {
                    if !self.config.follow_symlinks {
                        continue;
                    }
                    let Ok(meta) = fs::metadata(&path) else {
                        continue;
                    };
                    if meta.is_dir() {
                        let Ok(canonical) = fs::canonicalize(&path) else {
                            continue;
                        };
                        if self.is_excluded(&canonical) || !visited.insert(canonical) {
                            continue;
                        }
                        queue.push_back(path);
                    } else if meta.is_file() {
                        files.push(path);
                    }
                } else if file_type.is_dir() {
                    if self.config.follow_symlinks {
                        let canonical = fs::canonicalize(&path).unwrap_or_else(|_| path.clone());
                        if !visited.insert(canonical) {
                            continue;
                        }
                    }
                    queue.push_back(path);
                } else if file_type.is_file() {
                    files.push(path);
                }
            }

            for path in files {
                if self.cancel.is_cancelled() {
                    report.cancelled = true;
                    break 'dirs;
                }
                if tree.contains_file(&path) {
                    continue;
                }
                match tree.insert_file(&path) {
                    Ok(id) => report.discovered.push(id),
                    Err(err) => {
                        report.entries_skipped += 1;
                        reporter.report(&format!("skipped {}: {err}", path.display()));
                    }
                }
            }

            reporter.progress(&format!(
                "crawl: {} directories, {} new files",
                report.directories_visited,
                report.discovered.len()
            ));
        }

        report
    }

    fn is_excluded(&self, dir: &Path) -> bool {
        self.config
            .excluded_paths
            .iter()
            .any(|excluded| is_within(dir, excluded))
    }

    fn note_skip(&self, path: &Path, reason: &str, reporter: &mut dyn Reporter) {
        reporter.report(&format!("skipped {}: {reason}", path.display()));
        if let Some(logger) = &self.logger {
            logger.send(ActivityEvent::DirectorySkipped {
                path: path.to_string_lossy().into_owned(),
                reason: reason.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::report::MemoryReporter;
    use tempfile::TempDir;

    fn setup() -> (TempDir, PathBuf) {
        let tmp = TempDir::new().unwrap();
        let root = fs::canonicalize(tmp.path()).unwrap();
        (tmp, root)
    }

    fn crawler(config: CrawlerConfig) -> IncrementalCrawler {
        IncrementalCrawler::new(config, CancellationController::new())
    }

    #[test]
    fn discovers_nested_files() {
        let (_tmp, root) = setup();
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::write(root.join("top.txt"), b"1").unwrap();
        fs::write(root.join("a/mid.txt"), b"2").unwrap();
        fs::write(root.join("a/b/deep.txt"), b"3").unwrap();

        let mut tree = PathTree::new(&root);
        let report = crawler(CrawlerConfig::default()).crawl(&mut tree, &mut MemoryReporter::default());

        assert_eq!(report.discovered.len(), 3);
        assert_eq!(report.directories_visited, 3);
        assert!(!report.cancelled);
        assert!(tree.contains_file(&root.join("a/b/deep.txt")));
    }

    #[test]
    fn second_pass_discovers_nothing() {
        let (_tmp, root) = setup();
        fs::create_dir_all(root.join("x")).unwrap();
        fs::write(root.join("x/f"), b"1").unwrap();

        let mut tree = PathTree::new(&root);
        let c = crawler(CrawlerConfig::default());
        let first = c.crawl(&mut tree, &mut MemoryReporter::default());
        let second = c.crawl(&mut tree, &mut MemoryReporter::default());
        assert_eq!(first.discovered.len(), 1);
        assert!(second.discovered.is_empty());
        assert_eq!(tree.file_count(), 1);
    }

    #[test]
    fn breadth_first_discovery_order() {
        let (_tmp, root) = setup();
        fs::create_dir_all(root.join("d/e")).unwrap();
        fs::write(root.join("d/e/deep"), b"").unwrap();
        fs::write(root.join("d/shallow"), b"").unwrap();
        fs::write(root.join("top"), b"").unwrap();

        let mut tree = PathTree::new(&root);
        let report = crawler(CrawlerConfig::default()).crawl(&mut tree, &mut MemoryReporter::default());
        let names: Vec<&str> = report
            .discovered
            .iter()
            .map(|id| tree.file(*id).name())
            .collect();
        assert_eq!(names, vec!["top", "shallow", "deep"]);
    }

    #[test]
    fn excluded_directories_are_never_entered() {
        let (_tmp, root) = setup();
        let quarantine = root.join("quarantine");
        fs::create_dir_all(quarantine.join("nested")).unwrap();
        fs::write(quarantine.join("nested/moved.exe"), b"MZ").unwrap();
        fs::write(root.join("keep.exe"), b"MZ").unwrap();

        let mut tree = PathTree::new(&root);
        let config = CrawlerConfig {
            excluded_paths: vec![quarantine.clone()],
            follow_symlinks: false,
        };
        let report = crawler(config).crawl(&mut tree, &mut MemoryReporter::default());

        assert_eq!(report.directories_excluded, 1);
        assert!(tree.contains_file(&root.join("keep.exe")));
        assert!(
            tree.files()
                .all(|(id, _)| !tree.file_path(id).starts_with(&quarantine))
        );
    }

    #[test]
    fn missing_root_is_skipped_not_fatal() {
        let (_tmp, root) = setup();
        let mut tree = PathTree::new(root.join("gone"));
        let mut reporter = MemoryReporter::default();
        let report = crawler(CrawlerConfig::default()).crawl(&mut tree, &mut reporter);
        assert_eq!(report.directories_skipped, 1);
        assert!(report.discovered.is_empty());
        assert!(reporter.reported("not found"));
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_directory_is_skipped_and_crawl_continues() {
        use std::os::unix::fs::PermissionsExt;

        let (_tmp, root) = setup();
        let locked = root.join("locked");
        fs::create_dir_all(&locked).unwrap();
        fs::write(locked.join("hidden"), b"").unwrap();
        fs::create_dir_all(root.join("open")).unwrap();
        fs::write(root.join("open/visible"), b"").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        // Root ignores permission bits; nothing to assert in that case.
        if fs::read_dir(&locked).is_ok() {
            fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
            return;
        }

        let mut tree = PathTree::new(&root);
        let report = crawler(CrawlerConfig::default()).crawl(&mut tree, &mut MemoryReporter::default());
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        assert_eq!(report.directories_skipped, 1);
        assert!(tree.contains_file(&root.join("open/visible")));
        assert!(!tree.contains_file(&locked.join("hidden")));
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_ignored_by_default() {
        let (_tmp, root) = setup();
        let outside = TempDir::new().unwrap();
        fs::write(outside.path().join("target.bin"), b"").unwrap();
        std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();
        std::os::unix::fs::symlink(outside.path().join("target.bin"), root.join("file-link"))
            .unwrap();

        let mut tree = PathTree::new(&root);
        let report = crawler(CrawlerConfig::default()).crawl(&mut tree, &mut MemoryReporter::default());
        assert!(report.discovered.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn followed_symlink_cycles_terminate() {
        let (_tmp, root) = setup();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::write(root.join("a/f"), b"").unwrap();
        std::os::unix::fs::symlink(&root, root.join("a/loop")).unwrap();

        let mut tree = PathTree::new(&root);
        let config = CrawlerConfig {
            excluded_paths: Vec::new(),
            follow_symlinks: true,
        };
        let report = crawler(config).crawl(&mut tree, &mut MemoryReporter::default());
        assert_eq!(report.discovered.len(), 1);
    }

    #[test]
    fn cancellation_stops_traversal_between_directories() {
        let (_tmp, root) = setup();
        for d in ["a", "b", "c"] {
            fs::create_dir_all(root.join(d)).unwrap();
            fs::write(root.join(d).join("f"), b"").unwrap();
        }

        let cancel = CancellationController::new();
        let trigger = cancel.clone();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let crawler = IncrementalCrawler::new(CrawlerConfig::default(), cancel).with_heartbeat(
            move || {
                if counter.fetch_add(1, Ordering::SeqCst) == 1 {
                    trigger.request();
                }
            },
        );

        let mut tree = PathTree::new(&root);
        let report = crawler.crawl(&mut tree, &mut MemoryReporter::default());
        assert!(report.cancelled);
        // Root and the first subdirectory are enumerated; the request lands
        // before that subdirectory's file is checked.
        assert_eq!(report.directories_visited, 2);
        assert!(report.discovered.is_empty());
    }

    #[test]
    fn pre_cancelled_crawl_does_nothing() {
        let (_tmp, root) = setup();
        fs::write(root.join("f"), b"").unwrap();
        let cancel = CancellationController::new();
        cancel.request();
        let mut tree = PathTree::new(&root);
        let report = IncrementalCrawler::new(CrawlerConfig::default(), cancel)
            .crawl(&mut tree, &mut MemoryReporter::default());
        assert!(report.cancelled);
        assert_eq!(tree.file_count(), 0);
    }
}
