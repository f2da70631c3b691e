//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use quarantine_crawler::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{QcError, Result};

// Tree
pub use crate::tree::{DirId, FileId, PathTree};

// Classification
pub use crate::classifier::{Classifier, ClassifierKind, FileOutcome, Fingerprint};

// Phases
pub use crate::checkpoint::CheckpointStore;
pub use crate::engine::{Engine, RunOptions, RunSummary};
pub use crate::quarantine::{QuarantineMover, SelectionRule};
pub use crate::scanner::crawler::{CrawlerConfig, IncrementalCrawler};

// Control and reporting
pub use crate::control::CancellationController;
pub use crate::report::{MemoryReporter, NullReporter, Reporter};
