#![forbid(unsafe_code)]

//! Quarantine crawler (qcrawl): resumable classification and non-destructive
//! relocation of files across large, unreliable directory trees.
//!
//! A run moves through fixed phases:
//! 1. **Discover**: breadth-first crawl reconciled against an in-memory path tree
//! 2. **Classify**: executable-header detection or SHA-256 digest per file
//! 3. **Relocate**: selected files are renamed into a quarantine tree, never deleted
//!
//! The path tree is checkpointed so an interrupted run resumes where it stopped.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use quarantine_crawler::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use quarantine_crawler::engine::{Engine, RunOptions};
//! use quarantine_crawler::classifier::ClassifierKind;
//! ```

pub mod prelude;

pub mod checkpoint;
pub mod classifier;
#[cfg(feature = "cli")]
pub mod cli;
pub mod control;
pub mod core;
pub mod engine;
pub mod logger;
pub mod quarantine;
pub mod report;
pub mod scanner;
pub mod tree;
