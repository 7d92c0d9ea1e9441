#![warn(missing_docs)]
//! FluxTest Core - Artifact Runtime
//!
//! This crate is linked into the compiled test artifact:
//! - `TestDef` registry collected with `inventory`
//! - `TestContext` carrying the per-test seed and iteration count
//! - `WorkerMain`, the worker side of the supervisor protocol

mod context;
#[cfg(unix)]
mod worker;

pub use context::{TestContext, run_test};
#[cfg(unix)]
pub use worker::{WorkerError, WorkerMain, artifact_main, shutdown_requested};

/// Test definition registered via [`register!`]
#[derive(Debug, Clone)]
pub struct TestDef {
    /// Namespaced identifier (`module::test`)
    pub id: &'static str,
    /// Function pointer to the test body
    pub runner_fn: fn(&mut TestContext),
    /// Source file path
    pub file: &'static str,
    /// Source line number
    pub line: u32,
}

inventory::collect!(TestDef);

/// All registered tests, sorted by id for a stable discovery order.
pub fn registered_tests() -> Vec<&'static TestDef> {
    let mut tests: Vec<_> = inventory::iter::<TestDef>.into_iter().collect();
    tests.sort_by(|a, b| a.id.cmp(b.id));
    tests
}

/// Register a test function with the artifact.
///
/// ```ignore
/// fn adds(ctx: &mut fluxtest::TestContext) {
///     assert_eq!(1 + 1, 2);
/// }
/// fluxtest::register!("math::adds", adds);
/// ```
#[macro_export]
macro_rules! register {
    ($id:expr, $runner:path) => {
        $crate::internal::inventory::submit! {
            $crate::TestDef {
                id: $id,
                runner_fn: $runner,
                file: file!(),
                line: line!(),
            }
        }
    };
}

/// Internal re-exports for macro use
#[doc(hidden)]
pub mod internal {
    pub use inventory;
}
