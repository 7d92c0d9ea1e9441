//! Live console output while a run is in flight.
//!
//! The bar lives on stderr; failure lines go to stdout, printed with the bar
//! suspended so the two never interleave mid-line.

use crate::supervisor::RunObserver;
use fluxtest_report::{TestEvent, format_live_event};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;

/// Progress bar plus live failure lines for console runs
pub struct ConsoleProgress {
    pb: ProgressBar,
}

impl ConsoleProgress {
    /// Create the bar; its length is set once the plan is known
    pub fn new() -> Self {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
                )
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("#>-"),
        );
        pb.set_message("Starting workers...");
        Self { pb }
    }

    /// Remove the bar before the final summary is printed
    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

impl Default for ConsoleProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl RunObserver for ConsoleProgress {
    fn planned(&mut self, total: usize) {
        self.pb.set_length(total as u64);
        self.pb.set_message("");
    }

    fn event(&mut self, event: &TestEvent) {
        if let Some(line) = format_live_event(event) {
            self.pb.suspend(|| {
                let mut stdout = std::io::stdout().lock();
                let _ = stdout.write_all(line.as_bytes());
                let _ = stdout.flush();
            });
        }
        self.pb.set_message(event.test_id.clone());
        self.pb.inc(1);
    }
}
