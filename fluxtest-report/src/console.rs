//! Console Output
//!
//! Human-readable terminal output. Failing tests are printed live as their
//! events arrive (see [`format_live_event`]); the final report adds the
//! headline, the list of failing tests, runner errors, and a closing counts
//! line.

use crate::report::{Outcome, RunReport, RunStatus, TestEvent};
use colored::Colorize;

/// Line(s) to print while the run is in flight, or `None` for quiet outcomes.
pub fn format_live_event(event: &TestEvent) -> Option<String> {
    match event.outcome {
        Outcome::Fail => {
            let mut output = format!("{} {}\n", "✗".red(), event.test_id.red().bold());
            for message in &event.failure_messages {
                for line in message.lines() {
                    output.push_str(&format!("    {}\n", line));
                }
            }
            Some(output)
        }
        Outcome::Todo => Some(format!("{} {}\n", "◦ TODO".yellow(), event.test_id)),
        Outcome::Pass | Outcome::Skip => None,
    }
}

/// Format a finished run for terminal display
pub fn format_console_report(report: &RunReport) -> String {
    let summary = &report.summary;
    let mut output = String::new();

    output.push('\n');
    let headline = match report.status {
        RunStatus::Passed => "TEST RUN PASSED".green().bold(),
        RunStatus::Failed => "TEST RUN FAILED".red().bold(),
        RunStatus::Incomplete => "TEST RUN INCOMPLETE".yellow().bold(),
    };
    output.push_str(&format!("{}\n\n", headline));
    output.push_str(&format!(
        "Seed: {}  Fuzz iterations: {}\n",
        summary.seed, summary.fuzz_iterations
    ));
    output.push_str(&format!(
        "To reproduce this run: fluxtest --seed {} --fuzz {}\n",
        summary.seed, summary.fuzz_iterations
    ));

    let failing: Vec<_> = report
        .tests
        .iter()
        .filter(|t| t.outcome == Outcome::Fail)
        .collect();
    if !failing.is_empty() {
        output.push_str("\nFailures\n");
        output.push_str(&"-".repeat(60));
        output.push('\n');
        for test in failing {
            output.push_str(&format!("  {} {}\n", "✗".red(), test.test_id));
        }
    }

    if !summary.runner_errors.is_empty() {
        output.push_str("\nRunner errors\n");
        output.push_str(&"-".repeat(60));
        output.push('\n');
        for error in &summary.runner_errors {
            output.push_str(&format!("  {} {}\n", "!".yellow(), error));
        }
    }

    output.push('\n');
    output.push_str(&format!(
        "{} passed, {} failed, {} skipped, {} todo in {:.2} ms\n",
        summary.passed, summary.failed, summary.skipped, summary.todos, summary.duration_ms
    ));

    output
}
