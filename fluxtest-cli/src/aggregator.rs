//! Result Aggregator
//!
//! Folds worker reports into one [`RunSummary`]. The fold only counts, so
//! the final counts do not depend on how worker streams interleave. Accepted
//! events are kept for the JSON and JUnit renderers.

use fluxtest_ipc::{TestAssignment, TestOutcome, TestReport};
use fluxtest_report::{Outcome, RunReport, RunSummary, TestEvent};
use std::collections::HashSet;
use std::time::Duration;

/// Convert a wire report into a report event
pub fn to_event(worker: usize, report: TestReport) -> TestEvent {
    TestEvent {
        test_id: report.test_id,
        outcome: match report.outcome {
            TestOutcome::Pass => Outcome::Pass,
            TestOutcome::Fail => Outcome::Fail,
            TestOutcome::Skip => Outcome::Skip,
            TestOutcome::Todo => Outcome::Todo,
        },
        duration_ms: report.duration_nanos as f64 / 1_000_000.0,
        failure_messages: report.failure_messages,
        seed_used: report.seed,
        worker,
    }
}

/// Running fold over the events of one run
#[derive(Debug, Clone)]
pub struct Aggregator {
    summary: RunSummary,
    events: Vec<TestEvent>,
    seen: HashSet<String>,
}

impl Aggregator {
    /// Start a fold for a run with the given effective seed settings
    pub fn new(seed: u64, fuzz_iterations: u32) -> Self {
        Self {
            summary: RunSummary::new(seed, fuzz_iterations),
            events: Vec::new(),
            seen: HashSet::new(),
        }
    }

    /// Fold one event in. Returns the accepted event, or `None` when it was a
    /// duplicate of an id already reported (recorded as a runner error).
    pub fn record(&mut self, event: TestEvent) -> Option<&TestEvent> {
        if !self.seen.insert(event.test_id.clone()) {
            tracing::warn!(
                test = %event.test_id,
                worker = event.worker,
                "duplicate test report dropped"
            );
            self.summary.runner_errors.push(format!(
                "worker {} reported {} more than once; duplicate dropped",
                event.worker, event.test_id
            ));
            return None;
        }

        self.summary.total_tests += 1;
        match event.outcome {
            Outcome::Pass => self.summary.passed += 1,
            Outcome::Fail => self.summary.failed += 1,
            Outcome::Skip => self.summary.skipped += 1,
            Outcome::Todo => self.summary.todos += 1,
        }

        self.events.push(event);
        self.events.last()
    }

    /// Record a run-level error (crash, malformed frame, timeout)
    pub fn record_error(&mut self, error: impl Into<String>) {
        let error = error.into();
        tracing::debug!("runner error: {error}");
        self.summary.runner_errors.push(error);
    }

    /// Whether any test has failed so far
    pub fn any_failure(&self) -> bool {
        self.summary.any_failure()
    }

    /// Number of events folded in
    pub fn reported(&self) -> usize {
        self.events.len()
    }

    /// Ids from `assigned` that no worker has reported
    pub fn unreported<'a>(&self, assigned: &'a [TestAssignment]) -> Vec<&'a str> {
        assigned
            .iter()
            .map(|a| a.test_id.as_str())
            .filter(|id| !self.seen.contains(*id))
            .collect()
    }

    /// Summary so far
    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Close the fold, stamping the wall-clock duration of the run
    pub fn finish(mut self, elapsed: Duration) -> (RunSummary, Vec<TestEvent>) {
        self.summary.duration_ms = elapsed.as_secs_f64() * 1000.0;
        (self.summary, self.events)
    }

    /// Close the fold straight into a renderable report
    pub fn into_report(self, elapsed: Duration) -> RunReport {
        let (summary, events) = self.finish(elapsed);
        RunReport::new(summary, events)
    }
}

/// Fold a finite sequence of events into a summary
pub fn fold(
    seed: u64,
    fuzz_iterations: u32,
    events: impl IntoIterator<Item = TestEvent>,
) -> RunSummary {
    let mut aggregator = Aggregator::new(seed, fuzz_iterations);
    for event in events {
        aggregator.record(event);
    }
    aggregator.finish(Duration::ZERO).0
}
