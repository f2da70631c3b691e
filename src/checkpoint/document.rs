//! Serialized shape of a checkpoint.
//!
//! ```json
//! {"version":1,"generated_at":"…","classifier":"digest","root":"/data",
//!  "integrity":"<sha256 hex of folder>",
//!  "folder":{"name":"data","folders":[{"name":"a","files":[{"name":"x","digest":"…"}]}]}}
//! ```
//!
//! Folders nest recursively. A folder with no file anywhere beneath it is not
//! written. Files carry the payload of the run's classifier; a pending file is
//! written without one.

#![allow(missing_docs)]

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::classifier::digest::{digest_hex, parse_digest_hex};
use crate::classifier::{ClassifierKind, Fingerprint};
use crate::tree::{DirId, PathTree};

/// Current on-disk format version.
pub const CHECKPOINT_VERSION: u32 = 1;

/// Top-level checkpoint document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointDocument {
    pub version: u32,
    pub generated_at: String,
    pub classifier: ClassifierKind,
    pub root: PathBuf,
    /// SHA-256 hex over the serialized `folder`.
    pub integrity: String,
    pub folder: FolderElement,
}

/// One directory and its non-empty content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderElement {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub folders: Vec<FolderElement>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileElement>,
}

/// One file and its classification payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileElement {
    pub name: String,
    /// Signature classifier: whether the header was inspected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inspected: Option<bool>,
    /// Signature classifier: header match flag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub matched: Option<bool>,
    /// Digest classifier: lowercase hex digest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl FileElement {
    /// Encode a record for the given classifier.
    pub fn encode(name: &str, kind: ClassifierKind, classification: Option<Fingerprint>) -> Self {
        let mut element = Self {
            name: name.to_string(),
            inspected: None,
            matched: None,
            digest: None,
        };
        match (kind, classification) {
            (ClassifierKind::Signature, Some(Fingerprint::Signature(matched))) => {
                element.inspected = Some(true);
                element.matched = Some(matched);
            }
            (ClassifierKind::Signature, _) => element.inspected = Some(false),
            (ClassifierKind::Digest, Some(Fingerprint::Digest(digest))) => {
                element.digest = Some(digest_hex(&digest));
            }
            (ClassifierKind::Digest, _) => {}
        }
        element
    }

    /// Decode the payload. `Ok(None)` means pending.
    pub fn decode(&self, kind: ClassifierKind) -> Result<Option<Fingerprint>, String> {
        match kind {
            ClassifierKind::Signature => match (self.inspected, self.matched) {
                (Some(true), Some(matched)) => Ok(Some(Fingerprint::Signature(matched))),
                (Some(true), None) => Err(format!("file {:?} is inspected without a match flag", self.name)),
                _ => Ok(None),
            },
            ClassifierKind::Digest => match &self.digest {
                Some(hex) => parse_digest_hex(hex)
                    .map(|d| Some(Fingerprint::Digest(d)))
                    .ok_or_else(|| format!("file {:?} has malformed digest {hex:?}", self.name)),
                None => Ok(None),
            },
        }
    }
}

impl FolderElement {
    /// Serialize `dir` and everything beneath it.
    ///
    /// Returns `None` when the subtree holds no files, so empty branches are
    /// pruned. The root is always emitted via [`Self::root_from_tree`].
    pub fn from_tree(tree: &PathTree, dir: DirId, kind: ClassifierKind) -> Option<Self> {
        let element = Self::build(tree, dir, kind);
        if element.folders.is_empty() && element.files.is_empty() {
            None
        } else {
            Some(element)
        }
    }

    /// Serialize the whole tree; the root element exists even when empty.
    pub fn root_from_tree(tree: &PathTree, kind: ClassifierKind) -> Self {
        let mut root = Self::build(tree, tree.root_dir(), kind);
        root.name = tree
            .root_path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        root
    }

    fn build(tree: &PathTree, dir: DirId, kind: ClassifierKind) -> Self {
        let node = tree.dir(dir);
        Self {
            name: node.name().to_string(),
            folders: node
                .dirs()
                .filter_map(|(_, child)| Self::from_tree(tree, child, kind))
                .collect(),
            files: node
                .files()
                .map(|(name, id)| FileElement::encode(name, kind, tree.file(id).classification()))
                .collect(),
        }
    }

    /// Number of file elements in this subtree.
    pub fn file_count(&self) -> usize {
        self.files.len() + self.folders.iter().map(Self::file_count).sum::<usize>()
    }
}

/// True when `name` is a single plain path segment.
pub fn is_plain_segment(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(seg)), None) if seg == name
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::DIGEST_LEN;

    #[test]
    fn signature_payloads() {
        let resolved = FileElement::encode("a.exe", ClassifierKind::Signature, Some(Fingerprint::Signature(true)));
        assert_eq!(resolved.inspected, Some(true));
        assert_eq!(resolved.matched, Some(true));
        assert_eq!(resolved.decode(ClassifierKind::Signature), Ok(Some(Fingerprint::Signature(true))));

        let pending = FileElement::encode("b.exe", ClassifierKind::Signature, None);
        assert_eq!(pending.inspected, Some(false));
        assert_eq!(pending.matched, None);
        assert_eq!(pending.decode(ClassifierKind::Signature), Ok(None));
    }

    #[test]
    fn digest_payloads() {
        let digest = [0xAB; DIGEST_LEN];
        let resolved = FileElement::encode("x", ClassifierKind::Digest, Some(Fingerprint::Digest(digest)));
        assert_eq!(resolved.digest.as_deref(), Some("ab".repeat(DIGEST_LEN).as_str()));
        assert_eq!(resolved.decode(ClassifierKind::Digest), Ok(Some(Fingerprint::Digest(digest))));

        let pending = FileElement::encode("y", ClassifierKind::Digest, None);
        assert_eq!(pending.digest, None);
        assert_eq!(pending.decode(ClassifierKind::Digest), Ok(None));
    }

    #[test]
    fn malformed_payloads_are_rejected() {
        let mut element = FileElement::encode("x", ClassifierKind::Digest, None);
        element.digest = Some("nothex".to_string());
        assert!(element.decode(ClassifierKind::Digest).is_err());

        let mut element = FileElement::encode("x", ClassifierKind::Signature, None);
        element.inspected = Some(true);
        assert!(element.decode(ClassifierKind::Signature).is_err());
    }

    #[test]
    fn pending_files_are_written_empty_dirs_pruned() {
        let mut tree = PathTree::new("/crawl");
        tree.ensure_directory_path(["empty", "deeper"]);
        let a = tree.insert_file(Path::new("/crawl/full/a")).unwrap();
        tree.insert_file(Path::new("/crawl/full/b")).unwrap();
        tree.set_classification(a, Fingerprint::Signature(false));

        let root = FolderElement::root_from_tree(&tree, ClassifierKind::Signature);
        assert_eq!(root.name, "crawl");
        assert_eq!(root.folders.len(), 1);
        assert_eq!(root.folders[0].name, "full");
        assert_eq!(root.file_count(), 2);
    }

    #[test]
    fn empty_tree_keeps_root_element() {
        let tree = PathTree::new("/crawl");
        let root = FolderElement::root_from_tree(&tree, ClassifierKind::Digest);
        assert!(root.folders.is_empty());
        assert!(root.files.is_empty());
        let json = serde_json::to_string(&root).unwrap();
        assert_eq!(json, r#"{"name":"crawl"}"#);
    }

    #[test]
    fn plain_segments() {
        assert!(is_plain_segment("file.txt"));
        assert!(is_plain_segment("..hidden"));
        assert!(!is_plain_segment(""));
        assert!(!is_plain_segment("."));
        assert!(!is_plain_segment(".."));
        assert!(!is_plain_segment("a/b"));
        assert!(!is_plain_segment("/abs"));
        assert!(!is_plain_segment("trailing/"));
    }
}
