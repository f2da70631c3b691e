//! Run control: cooperative cancellation.

pub mod cancel;

pub use cancel::CancellationController;
