//! Checkpoint save and load.
//!
//! Saves are atomic: the document is written to `<path>.tmp`, synced, and
//! renamed over the previous checkpoint, so a crash leaves either the old or
//! the new file. Loads verify format version, integrity hash, classifier kind
//! and crawl root; any mismatch is an error the engine downgrades to "start
//! from an empty tree".

#![allow(missing_docs)]

use std::fs::{self, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::checkpoint::document::{
    CHECKPOINT_VERSION, CheckpointDocument, FolderElement, is_plain_segment,
};
use crate::classifier::digest::digest_hex;
use crate::classifier::{ClassifierKind, Fingerprint};
use crate::core::errors::{QcError, Result};
use crate::logger::jsonl::format_utc_now;
use crate::tree::{DirId, Discovery, FileId, PathTree};

/// What a save wrote.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveStats {
    pub files: usize,
    pub bytes: u64,
}

/// A tree rebuilt from a checkpoint.
#[derive(Debug)]
pub struct Restored {
    pub tree: PathTree,
    /// Records with no payload, in document order.
    pub pending: Vec<FileId>,
    /// Records with a payload, in document order.
    pub resolved: Vec<(FileId, Fingerprint)>,
    pub generated_at: String,
}

/// Reads and writes the checkpoint file at one path.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persist `tree` atomically.
    pub fn save(&self, tree: &PathTree, kind: ClassifierKind) -> Result<SaveStats> {
        let folder = FolderElement::root_from_tree(tree, kind);
        let folder_bytes = serde_json::to_vec(&folder).map_err(|e| QcError::Serialization {
            context: "checkpoint_save",
            details: e.to_string(),
        })?;

        let document = CheckpointDocument {
            version: CHECKPOINT_VERSION,
            generated_at: format_utc_now(),
            classifier: kind,
            root: tree.root_path().to_path_buf(),
            integrity: integrity_of(&folder_bytes),
            folder,
        };

        let temp_path = temp_path_for(&self.path);
        if let Some(parent) = temp_path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| QcError::io(parent, e))?;
        }

        let file = {
            let mut opts = OpenOptions::new();
            opts.write(true).create(true).truncate(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o600);
            }
            opts.open(&temp_path)
                .map_err(|e| QcError::io(&temp_path, e))?
        };

        let mut writer = BufWriter::new(file);
        serde_json::to_writer(&mut writer, &document).map_err(|e| QcError::Serialization {
            context: "checkpoint_write",
            details: e.to_string(),
        })?;
        writer.flush().map_err(|e| QcError::io(&temp_path, e))?;
        let file = writer
            .into_inner()
            .map_err(|e| QcError::io(&temp_path, e.into_error()))?;
        file.sync_all().map_err(|e| QcError::io(&temp_path, e))?;
        let bytes = file.metadata().map(|m| m.len()).unwrap_or(0);
        drop(file);

        fs::rename(&temp_path, &self.path).map_err(|e| QcError::io(&self.path, e))?;

        Ok(SaveStats {
            files: document.folder.file_count(),
            bytes,
        })
    }

    /// Load the checkpoint for `root` written by classifier `kind`.
    ///
    /// `Ok(None)` when no checkpoint exists. Every other failure is an `Err`
    /// describing why the file cannot be trusted.
    pub fn load(&self, root: &Path, kind: ClassifierKind) -> Result<Option<Restored>> {
        let file = match fs::File::open(&self.path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(QcError::io(&self.path, err)),
        };

        let mut deserializer = serde_json::Deserializer::from_reader(BufReader::new(file));
        deserializer.disable_recursion_limit();
        let document =
            CheckpointDocument::deserialize(&mut deserializer).map_err(|e| self.corrupt(e))?;
        deserializer.end().map_err(|e| self.corrupt(e))?;

        if document.version != CHECKPOINT_VERSION {
            return Err(self.mismatch(format!(
                "unsupported checkpoint version {} (expected {CHECKPOINT_VERSION})",
                document.version
            )));
        }

        let folder_bytes = serde_json::to_vec(&document.folder).map_err(|e| self.corrupt(e))?;
        if integrity_of(&folder_bytes) != document.integrity.to_ascii_lowercase() {
            return Err(self.corrupt("integrity hash mismatch"));
        }

        if document.classifier != kind {
            return Err(self.mismatch(format!(
                "written by the {} classifier, this run uses {kind}",
                document.classifier
            )));
        }
        if document.root != root {
            return Err(self.mismatch(format!(
                "written for root {}, this run crawls {}",
                document.root.display(),
                root.display()
            )));
        }

        let mut restored = Restored {
            tree: PathTree::new(root),
            pending: Vec::new(),
            resolved: Vec::new(),
            generated_at: document.generated_at,
        };
        let root_dir = restored.tree.root_dir();
        self.restore_folder(&document.folder, root_dir, kind, &mut restored)?;
        Ok(Some(restored))
    }

    fn restore_folder(
        &self,
        folder: &FolderElement,
        dir: DirId,
        kind: ClassifierKind,
        restored: &mut Restored,
    ) -> Result<()> {
        for element in &folder.files {
            if !is_plain_segment(&element.name) {
                return Err(self.corrupt(format!("invalid file name {:?}", element.name)));
            }
            let classification = element.decode(kind).map_err(|e| self.corrupt(e))?;
            match restored.tree.restore_file(dir, &element.name, classification) {
                Discovery::Pending(id) => restored.pending.push(id),
                Discovery::Resolved(id, fingerprint) => restored.resolved.push((id, fingerprint)),
            }
        }
        for child in &folder.folders {
            if !is_plain_segment(&child.name) {
                return Err(self.corrupt(format!("invalid folder name {:?}", child.name)));
            }
            let child_dir = restored.tree.ensure_child_dir(dir, &child.name);
            self.restore_folder(child, child_dir, kind, restored)?;
        }
        Ok(())
    }

    fn corrupt(&self, details: impl ToString) -> QcError {
        QcError::CheckpointCorrupt {
            path: self.path.clone(),
            details: details.to_string(),
        }
    }

    fn mismatch(&self, details: String) -> QcError {
        QcError::CheckpointMismatch {
            path: self.path.clone(),
            details,
        }
    }
}

fn integrity_of(bytes: &[u8]) -> String {
    let digest: [u8; 32] = Sha256::digest(bytes).into();
    digest_hex(&digest)
}

/// `state.json` -> `state.json.tmp`.
fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}
