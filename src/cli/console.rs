//! Terminal reporter: one progress line rewritten in place, durable report
//! lines above it.

use std::io::{self, IsTerminal, Stderr, Write};
use std::time::{Duration, Instant};

use colored::Colorize;
use crossterm::cursor::MoveToColumn;
use crossterm::queue;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};

use crate::report::Reporter;

/// Reporter writing to stderr.
///
/// Progress lines are throttled and only drawn when stderr is a terminal.
pub struct ConsoleReporter {
    out: Stderr,
    throttle: Duration,
    last_draw: Option<Instant>,
    show_progress: bool,
    line_dirty: bool,
}

impl ConsoleReporter {
    pub fn new(throttle: Duration) -> Self {
        let out = io::stderr();
        let show_progress = out.is_terminal();
        Self {
            out,
            throttle,
            last_draw: None,
            show_progress,
            line_dirty: false,
        }
    }

    /// Suppress progress drawing (JSON output, quiet runs).
    #[must_use]
    pub fn without_progress(mut self) -> Self {
        self.show_progress = false;
        self
    }

    /// Erase the progress line, if one is showing.
    pub fn finish(&mut self) {
        if self.line_dirty {
            let _ = queue!(self.out, MoveToColumn(0), Clear(ClearType::CurrentLine));
            let _ = self.out.flush();
            self.line_dirty = false;
        }
    }

    fn due(&self, now: Instant) -> bool {
        self.last_draw
            .is_none_or(|last| now.duration_since(last) >= self.throttle)
    }
}

impl Reporter for ConsoleReporter {
    fn progress(&mut self, line: &str) {
        if !self.show_progress {
            return;
        }
        let now = Instant::now();
        if !self.due(now) {
            return;
        }
        self.last_draw = Some(now);
        let _ = queue!(
            self.out,
            MoveToColumn(0),
            Clear(ClearType::CurrentLine),
            Print(line)
        );
        let _ = self.out.flush();
        self.line_dirty = true;
    }

    fn report(&mut self, line: &str) {
        self.finish();
        let styled = if line.starts_with("error") {
            line.red().to_string()
        } else if line.starts_with("warning") || line.starts_with("cancelled") {
            line.yellow().to_string()
        } else {
            line.to_string()
        };
        let _ = writeln!(self.out, "{styled}");
    }
}
