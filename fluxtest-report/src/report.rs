//! Report Data Structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Per-test outcome category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// Ran without failures
    Pass,
    /// Panicked or recorded at least one failure
    Fail,
    /// Marked as skipped by the test
    Skip,
    /// Marked as not yet written; does not fail the run
    Todo,
}

/// One test result as reported by a worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestEvent {
    /// Namespaced test identifier (`module::test`)
    pub test_id: String,
    /// Outcome category
    pub outcome: Outcome,
    /// Wall time of the test body
    pub duration_ms: f64,
    /// Ordered failure messages, empty unless the test failed
    pub failure_messages: Vec<String>,
    /// Seed the test was run with
    pub seed_used: u64,
    /// Index of the worker that ran the test
    pub worker: usize,
}

impl TestEvent {
    /// Module part of the id (everything before the last `::`)
    pub fn module(&self) -> &str {
        self.test_id
            .rsplit_once("::")
            .map(|(module, _)| module)
            .unwrap_or("root")
    }

    /// Test name without its module path
    pub fn name(&self) -> &str {
        self.test_id
            .rsplit_once("::")
            .map(|(_, name)| name)
            .unwrap_or(&self.test_id)
    }
}

/// Overall status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every test passed (todos and skips allowed) and the run completed
    Passed,
    /// The run completed and at least one test failed
    Failed,
    /// The run could not complete: a worker crashed, timed out, or the build failed
    Incomplete,
}

/// Aggregated run-level result consumed by every reporter
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Accepted test reports
    pub total_tests: usize,
    /// Tests that passed
    pub passed: usize,
    /// Tests that failed
    pub failed: usize,
    /// Tests marked skip
    pub skipped: usize,
    /// Tests marked todo
    pub todos: usize,
    /// Wall time of the whole run
    pub duration_ms: f64,
    /// Problems with the run itself rather than with any test
    pub runner_errors: Vec<String>,
    /// Effective base seed, generated or supplied
    pub seed: u64,
    /// Iterations handed to randomized tests
    pub fuzz_iterations: u32,
}

impl RunSummary {
    /// Empty summary for a run with the given seed settings
    pub fn new(seed: u64, fuzz_iterations: u32) -> Self {
        Self {
            seed,
            fuzz_iterations,
            ..Default::default()
        }
    }

    /// Summary for a run that never reached the test phase
    pub fn aborted(seed: u64, fuzz_iterations: u32, error: impl Into<String>) -> Self {
        let mut summary = Self::new(seed, fuzz_iterations);
        summary.runner_errors.push(error.into());
        summary
    }

    /// Whether any test failed
    pub fn any_failure(&self) -> bool {
        self.failed > 0
    }

    /// Run-level status derived from the counts and runner errors
    pub fn status(&self) -> RunStatus {
        if !self.runner_errors.is_empty() {
            RunStatus::Incomplete
        } else if self.any_failure() {
            RunStatus::Failed
        } else {
            RunStatus::Passed
        }
    }

    /// Process exit code: 0 only for a clean, fully passing run
    pub fn exit_code(&self) -> u8 {
        match self.status() {
            RunStatus::Passed => 0,
            RunStatus::Failed | RunStatus::Incomplete => 1,
        }
    }
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMeta {
    /// FluxTest version that produced the report
    pub version: String,
    /// When the report was assembled
    pub timestamp: DateTime<Utc>,
}

impl ReportMeta {
    /// Metadata stamped with the current time
    pub fn now() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Complete run report: summary plus per-test detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    /// Version and timestamp
    pub meta: ReportMeta,
    /// Copy of `summary.status()`
    pub status: RunStatus,
    /// Aggregated counts
    pub summary: RunSummary,
    /// Per-test detail, sorted by id
    pub tests: Vec<TestEvent>,
}

impl RunReport {
    /// Build a report; test detail is ordered by id so output is stable
    /// regardless of how worker streams interleaved.
    pub fn new(summary: RunSummary, mut tests: Vec<TestEvent>) -> Self {
        tests.sort_by(|a, b| a.test_id.cmp(&b.test_id));
        Self {
            meta: ReportMeta::now(),
            status: summary.status(),
            summary,
            tests,
        }
    }
}
