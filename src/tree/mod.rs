//! In-memory mirror of discovered directories and files.

pub mod store;

pub use store::{DirId, DirectoryNode, Discovery, FileId, FileRecord, PathTree};
