//! Test Context
//!
//! Per-test state handed to a test body. The runtime does not interpret the
//! seed beyond seeding [`TestContext::rng`]; randomized input generation is up
//! to the test itself.

use crate::TestDef;
use fluxtest_ipc::{TestOutcome, TestReport};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Skip,
    Todo,
}

/// State available to a running test
#[derive(Debug)]
pub struct TestContext {
    seed: u64,
    fuzz_iterations: u32,
    failures: Vec<String>,
    mark: Option<Mark>,
}

impl TestContext {
    /// Create a context for one test execution
    pub fn new(seed: u64, fuzz_iterations: u32) -> Self {
        Self {
            seed,
            fuzz_iterations,
            failures: Vec::new(),
            mark: None,
        }
    }

    /// Seed assigned to this test
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of iterations a randomized test should perform
    pub fn fuzz_iterations(&self) -> u32 {
        self.fuzz_iterations
    }

    /// Deterministic generator seeded with [`TestContext::seed`]
    pub fn rng(&self) -> StdRng {
        StdRng::seed_from_u64(self.seed)
    }

    /// Record a failure without aborting the test body
    pub fn fail(&mut self, message: impl Into<String>) {
        self.failures.push(message.into());
    }

    /// Mark the test as skipped
    pub fn skip(&mut self) {
        self.mark = Some(Mark::Skip);
    }

    /// Mark the test as not yet written
    pub fn todo(&mut self) {
        self.mark = Some(Mark::Todo);
    }

    fn outcome(&self) -> TestOutcome {
        if !self.failures.is_empty() {
            return TestOutcome::Fail;
        }
        match self.mark {
            Some(Mark::Skip) => TestOutcome::Skip,
            Some(Mark::Todo) => TestOutcome::Todo,
            None => TestOutcome::Pass,
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Unknown panic".to_string()
    }
}

/// Run one test body with panic catching and report its outcome.
pub fn run_test(def: &TestDef, seed: u64, fuzz_iterations: u32) -> TestReport {
    let start = Instant::now();
    let mut ctx = TestContext::new(seed, fuzz_iterations);

    let result =
        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| (def.runner_fn)(&mut ctx)));

    let duration_nanos = start.elapsed().as_nanos() as u64;

    let (outcome, failure_messages) = match result {
        Ok(()) => (ctx.outcome(), std::mem::take(&mut ctx.failures)),
        Err(panic) => {
            let mut messages = std::mem::take(&mut ctx.failures);
            messages.push(panic_message(panic.as_ref()));
            (TestOutcome::Fail, messages)
        }
    };

    TestReport {
        test_id: def.id.to_string(),
        outcome,
        duration_nanos,
        failure_messages,
        seed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    fn def(id: &'static str, runner_fn: fn(&mut TestContext)) -> TestDef {
        TestDef {
            id,
            runner_fn,
            file: file!(),
            line: line!(),
        }
    }

    #[test]
    fn test_pass() {
        let report = run_test(&def("ok::passes", |_| {}), 1, 100);
        assert_eq!(report.outcome, TestOutcome::Pass);
        assert!(report.failure_messages.is_empty());
        assert_eq!(report.seed, 1);
    }

    #[test]
    fn test_panic_becomes_failure() {
        let report = run_test(
            &def("bad::panics", |_| panic!("Expected true, got false")),
            1,
            100,
        );
        assert_eq!(report.outcome, TestOutcome::Fail);
        assert_eq!(report.failure_messages, vec!["Expected true, got false"]);
    }

    #[test]
    fn test_recorded_failures_keep_order() {
        let report = run_test(
            &def("bad::records", |ctx| {
                ctx.fail("first");
                ctx.fail("second");
            }),
            1,
            100,
        );
        assert_eq!(report.outcome, TestOutcome::Fail);
        assert_eq!(report.failure_messages, vec!["first", "second"]);
    }

    #[test]
    fn test_failure_wins_over_skip() {
        let report = run_test(
            &def("mixed::skip_then_fail", |ctx| {
                ctx.skip();
                ctx.fail("broken");
            }),
            1,
            100,
        );
        assert_eq!(report.outcome, TestOutcome::Fail);
    }

    #[test]
    fn test_skip_and_todo() {
        let skip = run_test(&def("s::skip", |ctx| ctx.skip()), 1, 100);
        let todo = run_test(&def("s::todo", |ctx| ctx.todo()), 1, 100);
        assert_eq!(skip.outcome, TestOutcome::Skip);
        assert_eq!(todo.outcome, TestOutcome::Todo);
    }

    #[test]
    fn test_rng_is_seed_deterministic() {
        let a = TestContext::new(42, 10).rng().next_u64();
        let b = TestContext::new(42, 10).rng().next_u64();
        let c = TestContext::new(43, 10).rng().next_u64();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
