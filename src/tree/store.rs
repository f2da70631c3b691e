//! Arena-backed path tree mirroring the crawl root.
//!
//! Directories and files live in two flat vectors. Children are owned by
//! name through index maps; every node keeps a plain index back to its parent
//! so full paths can be rebuilt without reference cycles. Nodes are never
//! removed during a run, so indices stay valid for the life of the tree.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use crate::classifier::Fingerprint;
use crate::core::errors::{QcError, Result};

/// Handle to a directory node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DirId(usize);

/// Handle to a file record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(usize);

impl DirId {
    #[inline]
    fn new(i: usize) -> Self {
        Self(i)
    }

    #[inline]
    fn idx(self) -> usize {
        self.0
    }
}

impl FileId {
    #[inline]
    fn new(i: usize) -> Self {
        Self(i)
    }

    #[inline]
    fn idx(self) -> usize {
        self.0
    }

    /// Insertion ordinal of the record (0-based).
    #[inline]
    pub fn ordinal(self) -> usize {
        self.idx()
    }
}

/// One directory below (or at) the crawl root.
#[derive(Debug, Clone)]
pub struct DirectoryNode {
    name: String,
    parent: Option<DirId>,
    dirs: BTreeMap<String, DirId>,
    files: BTreeMap<String, FileId>,
}

impl DirectoryNode {
    fn new(name: String, parent: Option<DirId>) -> Self {
        Self {
            name,
            parent,
            dirs: BTreeMap::new(),
            files: BTreeMap::new(),
        }
    }

    /// Leaf segment. Empty for the root.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<DirId> {
        self.parent
    }

    /// Child directories keyed by name.
    pub fn dirs(&self) -> impl Iterator<Item = (&str, DirId)> {
        self.dirs.iter().map(|(name, id)| (name.as_str(), *id))
    }

    /// Child files keyed by name.
    pub fn files(&self) -> impl Iterator<Item = (&str, FileId)> {
        self.files.iter().map(|(name, id)| (name.as_str(), *id))
    }
}

/// One discovered file.
#[derive(Debug, Clone)]
pub struct FileRecord {
    name: String,
    parent: DirId,
    classification: Option<Fingerprint>,
}

impl FileRecord {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> DirId {
        self.parent
    }

    pub fn classification(&self) -> Option<Fingerprint> {
        self.classification
    }

    /// True when no classification has been attached yet.
    pub fn is_pending(&self) -> bool {
        self.classification.is_none()
    }
}

/// Result of adding a record, telling the caller where to dispatch it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discovery {
    /// Needs classification.
    Pending(FileId),
    /// Already classified (restored from a checkpoint).
    Resolved(FileId, Fingerprint),
}

impl Discovery {
    pub fn file(self) -> FileId {
        match self {
            Self::Pending(id) | Self::Resolved(id, _) => id,
        }
    }
}

/// In-memory mirror of the directories and files found under one root.
#[derive(Debug, Clone)]
pub struct PathTree {
    root: PathBuf,
    dirs: Vec<DirectoryNode>,
    files: Vec<FileRecord>,
}

impl PathTree {
    /// Create an empty tree rooted at `root` (expected absolute and normalized).
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dirs: vec![DirectoryNode::new(String::new(), None)],
            files: Vec::new(),
        }
    }

    /// Absolute crawl root.
    pub fn root_path(&self) -> &Path {
        &self.root
    }

    /// Handle of the root directory node.
    pub fn root_dir(&self) -> DirId {
        DirId(0)
    }

    pub fn dir(&self, id: DirId) -> &DirectoryNode {
        &self.dirs[id.idx()]
    }

    pub fn file(&self, id: FileId) -> &FileRecord {
        &self.files[id.idx()]
    }

    pub fn dir_count(&self) -> usize {
        self.dirs.len()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Number of records carrying a classification.
    pub fn resolved_count(&self) -> usize {
        self.files.iter().filter(|f| !f.is_pending()).count()
    }

    /// Every record in insertion order.
    pub fn files(&self) -> impl Iterator<Item = (FileId, &FileRecord)> {
        self.files
            .iter()
            .enumerate()
            .map(|(i, record)| (FileId::new(i), record))
    }

    /// Pending records in insertion order.
    pub fn pending_files(&self) -> Vec<FileId> {
        self.files()
            .filter(|(_, record)| record.is_pending())
            .map(|(id, _)| id)
            .collect()
    }

    /// Walk (and create where missing) the directory chain named by
    /// `components`, starting at the root. Empty segments are ignored.
    pub fn ensure_directory_path<I, S>(&mut self, components: I) -> DirId
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut current = self.root_dir();
        for segment in components {
            let segment = segment.as_ref();
            if segment.is_empty() {
                continue;
            }
            current = self.ensure_child_dir(current, segment);
        }
        current
    }

    /// Get or create the child directory `name` of `parent`.
    pub fn ensure_child_dir(&mut self, parent: DirId, name: &str) -> DirId {
        if let Some(&existing) = self.dirs[parent.idx()].dirs.get(name) {
            return existing;
        }
        let id = DirId::new(self.dirs.len());
        self.dirs
            .push(DirectoryNode::new(name.to_string(), Some(parent)));
        self.dirs[parent.idx()].dirs.insert(name.to_string(), id);
        id
    }

    /// Look up a record by absolute path.
    pub fn find_file(&self, path: &Path) -> Option<FileId> {
        let (dirs, name) = self.split_relative(path).ok()?;
        let mut current = self.root_dir();
        for segment in &dirs {
            current = *self.dirs[current.idx()].dirs.get(segment)?;
        }
        self.dirs[current.idx()].files.get(&name).copied()
    }

    /// True when a record exists for `path`.
    pub fn contains_file(&self, path: &Path) -> bool {
        self.find_file(path).is_some()
    }

    /// Record a freshly discovered file at `path`, creating its parent chain.
    ///
    /// An existing record at the same name is reset to pending.
    pub fn insert_file(&mut self, path: &Path) -> Result<FileId> {
        let (dirs, name) = self.split_relative(path)?;
        let parent = self.ensure_directory_path(&dirs);
        Ok(self.put_file(parent, name, None))
    }

    /// Rehydrate a record under `dir`, keeping its stored classification.
    pub fn restore_file(
        &mut self,
        dir: DirId,
        name: &str,
        classification: Option<Fingerprint>,
    ) -> Discovery {
        let id = self.put_file(dir, name.to_string(), classification);
        match classification {
            Some(fingerprint) => Discovery::Resolved(id, fingerprint),
            None => Discovery::Pending(id),
        }
    }

    /// Attach a classification result to a record.
    pub fn set_classification(&mut self, file: FileId, fingerprint: Fingerprint) {
        self.files[file.idx()].classification = Some(fingerprint);
    }

    /// Path of `file` relative to the crawl root, rebuilt from its ancestors.
    pub fn relative_path(&self, file: FileId) -> PathBuf {
        let record = &self.files[file.idx()];
        let mut segments = vec![record.name.as_str()];
        let mut cursor = Some(record.parent);
        while let Some(dir) = cursor {
            let node = &self.dirs[dir.idx()];
            if node.parent.is_some() {
                segments.push(node.name.as_str());
            }
            cursor = node.parent;
        }
        segments.iter().rev().collect()
    }

    /// Absolute path of `file`.
    pub fn file_path(&self, file: FileId) -> PathBuf {
        self.root.join(self.relative_path(file))
    }

    fn put_file(
        &mut self,
        parent: DirId,
        name: String,
        classification: Option<Fingerprint>,
    ) -> FileId {
        if let Some(&existing) = self.dirs[parent.idx()].files.get(&name) {
            self.files[existing.idx()].classification = classification;
            return existing;
        }
        let id = FileId::new(self.files.len());
        self.files.push(FileRecord {
            name: name.clone(),
            parent,
            classification,
        });
        self.dirs[parent.idx()].files.insert(name, id);
        id
    }

    /// Split an absolute path into directory segments and a file name,
    /// relative to the root. Lookup and insertion share this so they agree
    /// on identity: duplicate, trailing and `.` separators collapse.
    fn split_relative(&self, path: &Path) -> Result<(Vec<String>, String)> {
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| QcError::PathOutsideRoot {
                path: path.to_path_buf(),
                root: self.root.clone(),
            })?;

        let mut segments = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(os) => {
                    let segment = os.to_str().ok_or_else(|| QcError::UnrepresentablePath {
                        path: path.to_path_buf(),
                        details: "name is not valid UTF-8".to_string(),
                    })?;
                    segments.push(segment.to_string());
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(QcError::PathOutsideRoot {
                        path: path.to_path_buf(),
                        root: self.root.clone(),
                    });
                }
            }
        }

        let name = segments.pop().ok_or_else(|| QcError::UnrepresentablePath {
            path: path.to_path_buf(),
            details: "path names the root, not a file".to_string(),
        })?;
        Ok((segments, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> PathTree {
        PathTree::new("/crawl")
    }

    #[test]
    fn ensure_directory_path_is_idempotent() {
        let mut t = tree();
        let a = t.ensure_directory_path(["a", "b", "c"]);
        let b = t.ensure_directory_path(["a", "", "b", "c"]);
        assert_eq!(a, b);
        assert_eq!(t.dir_count(), 4);
        assert_eq!(t.dir(a).name(), "c");
    }

    #[test]
    fn insert_then_contains() {
        let mut t = tree();
        let path = Path::new("/crawl/x/y/file.exe");
        assert!(!t.contains_file(path));
        let id = t.insert_file(path).unwrap();
        assert!(t.contains_file(path));
        assert_eq!(t.find_file(path), Some(id));
        assert!(t.file(id).is_pending());
        assert_eq!(t.relative_path(id), PathBuf::from("x/y/file.exe"));
        assert_eq!(t.file_path(id), PathBuf::from("/crawl/x/y/file.exe"));
    }

    #[test]
    fn file_at_root_has_bare_relative_path() {
        let mut t = tree();
        let id = t.insert_file(Path::new("/crawl/top.bin")).unwrap();
        assert_eq!(t.relative_path(id), PathBuf::from("top.bin"));
        assert_eq!(t.file(id).parent(), t.root_dir());
    }

    #[test]
    fn duplicate_separators_share_identity() {
        let mut t = tree();
        let id = t.insert_file(Path::new("/crawl//a///b/./f.txt")).unwrap();
        assert_eq!(t.find_file(Path::new("/crawl/a/b/f.txt")), Some(id));
        assert_eq!(t.dir_count(), 3);
    }

    #[test]
    fn insert_overwrites_existing_record() {
        let mut t = tree();
        let path = Path::new("/crawl/a/f");
        let id = t.insert_file(path).unwrap();
        t.set_classification(id, Fingerprint::Signature(true));
        let again = t.insert_file(path).unwrap();
        assert_eq!(id, again);
        assert!(t.file(again).is_pending());
        assert_eq!(t.file_count(), 1);
    }

    #[test]
    fn same_name_in_different_directories_is_distinct() {
        let mut t = tree();
        let a = t.insert_file(Path::new("/crawl/a/f")).unwrap();
        let b = t.insert_file(Path::new("/crawl/b/f")).unwrap();
        assert_ne!(a, b);
        assert_eq!(t.file_count(), 2);
    }

    #[test]
    fn rejects_paths_outside_root() {
        let mut t = tree();
        let err = t.insert_file(Path::new("/elsewhere/f")).unwrap_err();
        assert_eq!(err.code(), "QC-2001");
        let err = t.insert_file(Path::new("/crawl/../etc/passwd")).unwrap_err();
        assert_eq!(err.code(), "QC-2001");
        assert!(!t.contains_file(Path::new("/elsewhere/f")));
    }

    #[test]
    fn rejects_root_itself() {
        let mut t = tree();
        let err = t.insert_file(Path::new("/crawl")).unwrap_err();
        assert_eq!(err.code(), "QC-2002");
    }

    #[test]
    fn restore_reports_pending_or_resolved() {
        let mut t = tree();
        let dir = t.ensure_directory_path(["d"]);
        let pending = t.restore_file(dir, "p", None);
        let resolved = t.restore_file(dir, "r", Some(Fingerprint::Signature(false)));
        assert!(matches!(pending, Discovery::Pending(_)));
        assert_eq!(
            resolved,
            Discovery::Resolved(resolved.file(), Fingerprint::Signature(false))
        );
        assert_eq!(t.pending_files(), vec![pending.file()]);
        assert_eq!(t.resolved_count(), 1);
    }

    #[test]
    fn children_are_listed_by_name() {
        let mut t = tree();
        t.insert_file(Path::new("/crawl/b/2")).unwrap();
        t.insert_file(Path::new("/crawl/a/1")).unwrap();
        t.insert_file(Path::new("/crawl/z")).unwrap();
        let root = t.dir(t.root_dir());
        let dirs: Vec<&str> = root.dirs().map(|(n, _)| n).collect();
        let files: Vec<&str> = root.files().map(|(n, _)| n).collect();
        assert_eq!(dirs, vec!["a", "b"]);
        assert_eq!(files, vec!["z"]);
    }

    #[test]
    fn file_ids_are_distinct_insertion_ordinals() {
        let mut tree = tree();
        let ids: Vec<FileId> = (0..1000)
            .map(|i| tree.insert_file(Path::new(&format!("/crawl/d{}/f{i}", i % 7))).unwrap())
            .collect();
        for (i, id) in ids.iter().enumerate() {
            assert_eq!(id.ordinal(), i);
        }
        let unique: std::collections::HashSet<_> = ids.iter().collect();
        assert_eq!(unique.len(), ids.len());
    }

    #[cfg(unix)]
    #[test]
    fn rejects_non_utf8_names() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;
        let mut t = tree();
        let path = Path::new("/crawl").join(OsStr::from_bytes(b"bad\xff"));
        let err = t.insert_file(&path).unwrap_err();
        assert_eq!(err.code(), "QC-2002");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn segment() -> impl Strategy<Value = String> {
            "[a-zA-Z0-9_.-]{1,8}".prop_filter("not a dot segment", |s| s != "." && s != "..")
        }

        fn separator() -> impl Strategy<Value = &'static str> {
            prop_oneof![Just("/"), Just("//"), Just("/./")]
        }

        proptest! {
            #[test]
            fn lookup_agrees_with_insertion(
                segments in prop::collection::vec(segment(), 1..6),
                seps in prop::collection::vec(separator(), 6),
            ) {
                let mut noisy = String::from("/crawl");
                for (segment, sep) in segments.iter().zip(&seps) {
                    noisy.push_str(sep);
                    noisy.push_str(segment);
                }
                let clean = format!("/crawl/{}", segments.join("/"));

                let mut t = tree();
                let id = t.insert_file(Path::new(&noisy)).unwrap();
                prop_assert_eq!(t.find_file(Path::new(&clean)), Some(id));
                prop_assert_eq!(t.file_path(id), PathBuf::from(&clean));
                prop_assert_eq!(t.insert_file(Path::new(&clean)).unwrap(), id);
                prop_assert_eq!(t.file_count(), 1);
            }
        }
    }
}
