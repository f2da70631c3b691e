//! Human-facing progress capability consumed by the engine.
//!
//! The engine only needs to emit a transient progress string and a durable
//! report line (warnings, per-file outcomes). Rendering belongs to the caller.

/// Sink for progress and report lines.
pub trait Reporter {
    /// Transient status, expected to overwrite the previous one.
    fn progress(&mut self, line: &str);

    /// Durable line that must not be overwritten.
    fn report(&mut self, line: &str);
}

/// Reporter that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {
    fn progress(&mut self, _line: &str) {}

    fn report(&mut self, _line: &str) {}
}

/// Reporter that records lines in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryReporter {
    pub progress: Vec<String>,
    pub reports: Vec<String>,
}

impl MemoryReporter {
    /// True if any report line contains `needle`.
    pub fn reported(&self, needle: &str) -> bool {
        self.reports.iter().any(|line| line.contains(needle))
    }
}

impl Reporter for MemoryReporter {
    fn progress(&mut self, line: &str) {
        self.progress.push(line.to_string());
    }

    fn report(&mut self, line: &str) {
        self.reports.push(line.to_string());
    }
}
