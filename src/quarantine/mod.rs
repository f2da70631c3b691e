//! Selection of files to relocate and the mover that relocates them.

pub mod mover;
pub mod selection;

pub use mover::{MoveReport, QuarantineMover};
pub use selection::{Selection, SelectionRule};
