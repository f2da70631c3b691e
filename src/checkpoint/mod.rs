//! Durable, tree-shaped snapshots of the path tree.

pub mod document;
pub mod store;

pub use store::{CheckpointStore, Restored, SaveStats};
