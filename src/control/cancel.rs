//! Cooperative cancellation.
//!
//! The interrupt path only stores into an `AtomicBool`. Everything else reads
//! the flag through [`CancellationController::is_cancelled`], which latches it
//! into lock-guarded state, so the main loop never observes a cancel request
//! half-way through a checkpoint save.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

#[derive(Debug, Default)]
struct CancelState {
    cancelled: bool,
}

/// Shared cancellation flag checked at the crawl, classify and move safe points.
#[derive(Debug, Clone, Default)]
pub struct CancellationController {
    raised: Arc<AtomicBool>,
    state: Arc<Mutex<CancelState>>,
}

impl CancellationController {
    /// A controller with no OS hooks; cancel via [`Self::request`].
    pub fn new() -> Self {
        Self::default()
    }

    /// A controller that SIGINT and SIGTERM cancel.
    ///
    /// Registration is best-effort; failures are logged to stderr but not
    /// fatal. A second SIGINT after the first terminates the process.
    #[cfg(feature = "signals")]
    pub fn with_os_signals() -> Self {
        let controller = Self::new();
        controller.register_signals();
        controller
    }

    #[cfg(feature = "signals")]
    fn register_signals(&self) {
        use signal_hook::consts::{SIGINT, SIGTERM};

        if let Err(e) =
            signal_hook::flag::register_conditional_shutdown(SIGINT, 130, Arc::clone(&self.raised))
        {
            eprintln!("[QC-SIGNAL] failed to register SIGINT escalation: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGINT, Arc::clone(&self.raised)) {
            eprintln!("[QC-SIGNAL] failed to register SIGINT: {e}");
        }
        if let Err(e) = signal_hook::flag::register(SIGTERM, Arc::clone(&self.raised)) {
            eprintln!("[QC-SIGNAL] failed to register SIGTERM: {e}");
        }
    }

    /// Whether cancellation has been requested. Safe point check.
    pub fn is_cancelled(&self) -> bool {
        let mut state = self.state.lock();
        Self::latch(&self.raised, &mut state);
        state.cancelled
    }

    /// Programmatically request cancellation.
    pub fn request(&self) {
        self.state.lock().cancelled = true;
    }

    /// Run `f` while holding the cancellation lock, passing the latched flag.
    ///
    /// Checkpoint saves go through here so the decision to persist and the
    /// flag value it was based on cannot diverge.
    pub fn guarded<T>(&self, f: impl FnOnce(bool) -> T) -> T {
        let mut state = self.state.lock();
        Self::latch(&self.raised, &mut state);
        f(state.cancelled)
    }

    fn latch(raised: &AtomicBool, state: &mut CancelState) {
        if raised.load(Ordering::Relaxed) {
            state.cancelled = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_clear() {
        let cancel = CancellationController::new();
        assert!(!cancel.is_cancelled());
    }

    #[test]
    fn request_is_visible_to_clones() {
        let cancel = CancellationController::new();
        let other = cancel.clone();
        other.request();
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn raised_flag_is_latched() {
        let cancel = CancellationController::new();
        cancel.raised.store(true, Ordering::Relaxed);
        assert!(cancel.is_cancelled());
        cancel.raised.store(false, Ordering::Relaxed);
        assert!(cancel.is_cancelled(), "cancellation must stay latched");
    }

    #[test]
    fn guarded_sees_flag_and_returns_value() {
        let cancel = CancellationController::new();
        assert_eq!(cancel.guarded(|c| if c { 1 } else { 0 }), 0);
        cancel.request();
        assert_eq!(cancel.guarded(|c| if c { 1 } else { 0 }), 1);
    }

    #[test]
    fn request_waits_for_guarded_section() {
        let cancel = CancellationController::new();
        let remote = cancel.clone();
        let (seen, finished_inside, handle) = cancel.guarded(|flag| {
            let handle = std::thread::spawn(move || remote.request());
            std::thread::sleep(std::time::Duration::from_millis(50));
            (flag, handle.is_finished(), handle)
        });
        handle.join().unwrap();
        assert!(!seen);
        assert!(!finished_inside, "request must block while a save holds the lock");
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn request_from_another_thread() {
        let cancel = CancellationController::new();
        let remote = cancel.clone();
        std::thread::spawn(move || remote.request()).join().unwrap();
        assert!(cancel.is_cancelled());
    }
}
