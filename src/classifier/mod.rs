//! Per-file classification: fingerprints, the classifier seam, and the
//! mapping from IO failures to per-file outcomes.
//!
//! Two strategies exist and exactly one is used per run:
//! - [`signature::SignatureClassifier`] detects executable images by header.
//! - [`digest::DigestClassifier`] hashes the full content.

pub mod digest;
pub mod pool;
pub mod signature;

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, ErrorKind, Read, Seek};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::errors::QcError;

/// Length in bytes of a content digest.
pub const DIGEST_LEN: usize = 32;

/// Classification result attached to a file record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fingerprint {
    /// Executable-header match flag.
    Signature(bool),
    /// Content digest.
    Digest([u8; DIGEST_LEN]),
}

impl Fingerprint {
    /// Strategy that produced this fingerprint.
    pub const fn kind(&self) -> ClassifierKind {
        match self {
            Self::Signature(_) => ClassifierKind::Signature,
            Self::Digest(_) => ClassifierKind::Digest,
        }
    }
}

/// Which classification strategy a run uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    #[default]
    Signature,
    Digest,
}

impl ClassifierKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Signature => "signature",
            Self::Digest => "digest",
        }
    }

    /// Build the classifier implementing this strategy.
    pub fn classifier(self) -> Box<dyn Classifier> {
        match self {
            Self::Signature => Box::new(signature::SignatureClassifier),
            Self::Digest => Box::new(digest::DigestClassifier),
        }
    }
}

impl fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Readable, seekable byte source handed to a classifier.
pub trait ContentSource: Read + Seek {}

impl<T: Read + Seek> ContentSource for T {}

/// A classification strategy.
///
/// Implementations must be pure functions of the byte stream: the engine may
/// call them from worker threads.
pub trait Classifier: Send + Sync {
    /// Strategy identifier, persisted in the checkpoint.
    fn kind(&self) -> ClassifierKind;

    /// Compute the fingerprint of a stream positioned at offset 0.
    ///
    /// Returns `Err` only when the stream cannot be read at all.
    fn classify(&self, source: &mut dyn ContentSource) -> io::Result<Fingerprint>;
}

/// What happened when one queued file was classified.
#[derive(Debug)]
pub enum FileOutcome {
    /// Classification succeeded.
    Resolved(Fingerprint),
    /// The file vanished or is not readable by us; the record stays pending.
    Skipped(SkipCause),
    /// Unexpected IO failure; reported and the record stays pending.
    Failed(QcError),
}

/// Why a file was silently skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipCause {
    NotFound,
    PermissionDenied,
}

/// Open `path` and run `classifier` on it, folding expected IO failures into
/// [`FileOutcome::Skipped`].
pub fn classify_path(classifier: &dyn Classifier, path: &Path) -> FileOutcome {
    let result = File::open(path).and_then(|file| {
        let mut reader = BufReader::with_capacity(64 * 1024, file);
        classifier.classify(&mut reader)
    });
    match result {
        Ok(fingerprint) => FileOutcome::Resolved(fingerprint),
        Err(err) if err.kind() == ErrorKind::NotFound => FileOutcome::Skipped(SkipCause::NotFound),
        Err(err) if err.kind() == ErrorKind::PermissionDenied => {
            FileOutcome::Skipped(SkipCause::PermissionDenied)
        }
        Err(err) => FileOutcome::Failed(QcError::io(path, err)),
    }
}
