//! Terminal-facing pieces shared by the `qcrawl` binary.
#![allow(missing_docs)]

pub mod console;
pub mod legacy;

pub use console::ConsoleReporter;
pub use legacy::rewrite_legacy_args;
