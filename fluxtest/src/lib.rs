#![warn(missing_docs)]
//! # FluxTest
//!
//! Parallel test runner with crash isolation and reproducible randomized
//! tests.
//!
//! - **Process Isolation**: tests run in a pool of worker processes; a worker
//!   that dies takes only its own partition down, and the run still reports
//! - **Reproducible Seeds**: every test receives a seed derived from the run's
//!   base seed, so `--seed` replays a run exactly regardless of worker count
//! - **CI Output**: console, JSON, or JUnit XML on stdout
//! - **Watch Mode**: reruns on file changes without ever overlapping runs
//!
//! ## Quick Start
//!
//! The test artifact is an ordinary binary whose `main` hands control to the
//! worker runtime:
//!
//! ```ignore
//! use fluxtest::TestContext;
//!
//! fn parses_empty_input(ctx: &mut TestContext) {
//!     if parse("").is_err() {
//!         ctx.fail("empty input rejected");
//!     }
//! }
//! fluxtest::register!("parser::empty_input", parses_empty_input);
//!
//! fn main() -> std::process::ExitCode {
//!     fluxtest::artifact_main()
//! }
//! ```
//!
//! Then run it with `fluxtest --artifact target/debug/my-tests`.

pub use fluxtest_core::{TestContext, TestDef, register, registered_tests, run_test};

#[cfg(unix)]
pub use fluxtest_core::artifact_main;

pub use fluxtest_report::{Outcome, ReportFormat, RunReport, RunStatus, RunSummary, TestEvent};

/// Run the FluxTest CLI with the process arguments.
pub use fluxtest_cli::run;
